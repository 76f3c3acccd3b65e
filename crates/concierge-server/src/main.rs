//! # Concierge Server
//!
//! Real-time update gateway for the hotel concierge.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! concierge
//!
//! # Run with a custom config file
//! CONCIERGE_CONFIG=/path/to/concierge.toml concierge
//!
//! # Override single values
//! CONCIERGE__PORT=8080 CONCIERGE__HUB__HEARTBEAT_SECS=15 concierge
//! ```

use anyhow::Result;
use concierge_server::{handlers, metrics, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "concierge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!("Starting Concierge server on {}:{}", config.host, config.port);

    if config.metrics.enabled {
        if let Err(e) = metrics::install(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }

    handlers::run_server(config).await?;

    Ok(())
}
