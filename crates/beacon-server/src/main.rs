//! # Beacon Server
//!
//! Realtime chat presence and fanout server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! beacon
//!
//! # Run with a config file in the search path
//! cp beacon.toml /etc/beacon/beacon.toml && beacon
//!
//! # Run with environment variables
//! BEACON_PORT=8080 BEACON_HOST=0.0.0.0 beacon
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Beacon server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server with in-memory collaborators; deployments embed
    // handlers::run_server with their own storage and session backends.
    handlers::run_server_in_memory(config).await?;

    Ok(())
}
