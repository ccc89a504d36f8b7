//! HTTP server for the dash-ops control plane

pub mod api;
pub mod config;

pub use api::{create_router, serve, AppState};
pub use config::{LogFormat, ServerConfig};
