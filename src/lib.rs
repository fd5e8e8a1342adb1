//! input-guard
//!
//! Defensive input validation for network-facing services.
//!
//! # Features
//!
//! - **Sanitizer**: pattern-based stripping of script blocks, inline event
//!   handlers, tag markup, SQL keywords and `$`-prefixed `NoSQL` operators
//! - **Request field guard**: axum middleware that rewrites every string
//!   field of the body, query and path parameters before handlers run
//! - **SSRF guard**: resolve-then-check validation of outbound URLs,
//!   deny-by-default on any failure
//! - **Guarded client**: outbound HTTP fetches pinned to the addresses the
//!   SSRF guard approved, with every redirect hop re-validated

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod guard;
pub mod security;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
