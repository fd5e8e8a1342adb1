//! HTTP surface: router, handlers and server lifecycle

pub mod router;
pub mod service;

pub use router::{AppState, create_router};
pub use service::Server;
