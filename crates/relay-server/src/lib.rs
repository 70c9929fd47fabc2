//! # relay-server
//!
//! WebSocket front end for the relay: configuration, the HTTP surface,
//! per-connection socket tasks, metrics and shutdown handling.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod shutdown;

pub use config::Config;
pub use handlers::{router, serve, AppState};
