//! # Herald Server
//!
//! Pub/sub broker with websocket subscribers and HTTP and memcache
//! publishers.
//!
//! ## Usage
//!
//! ```bash
//! # Run with herald.toml from the working directory
//! herald
//!
//! # Run with an explicit config file
//! HERALD_CONFIG=/path/to/herald.toml herald
//!
//! # Override settings with environment variables
//! HERALD__PORT=8080 HERALD__HOST=0.0.0.0 herald
//! ```

use anyhow::Result;
use herald_server::{metrics, run_server, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Herald server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    run_server(config).await?;

    Ok(())
}
