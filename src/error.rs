//! Error types for input-guard

use std::io;

use thiserror::Error;

/// Result type alias for input-guard
pub type Result<T> = std::result::Result<T, Error>;

/// input-guard errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Outbound URL rejected by the SSRF guard.
    ///
    /// Deliberately carries no reason: callers must not be able to tell a
    /// DNS failure from a private-address match.
    #[error("URL not allowed")]
    UrlDenied,

    /// Outbound fetch failed after the URL was approved
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error originated from the SSRF guard
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::UrlDenied)
    }
}
