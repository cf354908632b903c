//! # herald-server
//!
//! The `herald` binary's building blocks: configuration, HTTP routes,
//! message ingestion and metrics.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod publish;

pub use config::Config;
pub use handlers::{app, run_server, AppState};
pub use publish::{publish, MemcacheBackend, PublishError};
