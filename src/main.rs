//! Opsboard Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - OPSBOARD_HOST: Bind address (default: 0.0.0.0)
//! - OPSBOARD_PORT: Port number (default: 8988)
//! - OPSBOARD_CONF: Main configuration file (default: /etc/opsboard.toml)
//! - OPSBOARD_DASHBOARDS: Dashboard directory (default: /etc/opsboard.d)
//! - RUST_LOG: Log level (default: info)
//!
//! Send SIGHUP to reload the configuration files.

use opsboard::api::{run_server, ServerConfig};
use opsboard::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opsboard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();

    tracing::info!("Opsboard configuration:");
    tracing::info!("  Host: {}:{}", settings.host, settings.port);
    tracing::info!("  Config file: {}", settings.config_file.display());
    tracing::info!("  Dashboards: {}", settings.dashboard_dir.display());
    tracing::info!("  Version: {}", env!("CARGO_PKG_VERSION"));

    run_server(ServerConfig::from(&settings)).await
}
