use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    aggregate, default_aggregate, delete_silence, health, link_silence, list_alerts,
    list_dashboards, list_silences, silence_alert, AppState,
};
use crate::aggregation::{Aggregator, AggregatorHealth};
use crate::clock::SystemClock;
use crate::config::{ConfigLoader, Settings};
use crate::health::{HealthRegistry, CHECK_INTERVAL};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub loader: ConfigLoader,
}

impl From<&Settings> for ServerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            loader: settings.loader(),
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/actuator/health", get(health))
        // Dashboards
        .route("/api/dashboards", get(list_dashboards))
        .route("/api/aggregate", get(default_aggregate))
        .route("/api/aggregate/:dashboard", get(aggregate))
        // Silences
        .route("/api/alerts/:id/silence", post(silence_alert))
        .route("/api/alerts/:id/link", post(link_silence))
        .route("/api/silences", get(list_silences))
        .route("/api/silences/:id", delete(delete_silence))
        // Alertmanager compatible listing
        .route("/api/v2/alerts", get(list_alerts))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = config.loader.load()?;
    tracing::info!(
        interval = ?loaded.interval,
        connectors = loaded.configuration.connectors.len(),
        dashboards = loaded.configuration.dashboards.len(),
        "Configuration loaded"
    );

    let aggregator = Arc::new(Aggregator::new(
        loaded.configuration,
        loaded.interval,
        SystemClock::shared(),
    ));

    let health = Arc::new(HealthRegistry::new());
    health.register(
        "aggregator",
        Arc::new(AggregatorHealth::new(Arc::clone(&aggregator))),
    );

    // Start background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let aggregator_handle = Arc::clone(&aggregator).start();
    let health_handle = Arc::clone(&health).start(CHECK_INTERVAL, shutdown_rx.clone());
    let reload_handle = tokio::spawn(reload_on_hangup(
        config.loader.clone(),
        Arc::clone(&aggregator),
        shutdown_rx,
    ));

    let state = Arc::new(AppState {
        aggregator: Arc::clone(&aggregator),
        health,
    });
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting opsboard on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&aggregator), shutdown_tx))
        .await?;

    // Wait for workers to stop
    let _ = aggregator_handle.await;
    let _ = health_handle.await;
    reload_handle.abort();

    tracing::info!("opsboard stopped");
    Ok(())
}

async fn shutdown_signal(aggregator: Arc<Aggregator>, shutdown: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping workers...");
    aggregator.stop();
    shutdown.send_replace(true);
}

/// Reload configuration on SIGHUP. An invalid configuration is rejected
/// as a whole and the running one kept.
#[cfg(unix)]
async fn reload_on_hangup(
    loader: ConfigLoader,
    aggregator: Arc<Aggregator>,
    mut shutdown: watch::Receiver<bool>,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGHUP, reloading disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                reload(&loader, &aggregator);
            }
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(
    _loader: ConfigLoader,
    _aggregator: Arc<Aggregator>,
    _shutdown: watch::Receiver<bool>,
) {
}

fn reload(loader: &ConfigLoader, aggregator: &Aggregator) {
    match loader.load() {
        Ok(loaded) => {
            if loaded.interval != aggregator.interval() {
                tracing::warn!(
                    configured = ?loaded.interval,
                    running = ?aggregator.interval(),
                    "Interval changes need a restart"
                );
            }
            aggregator.reconfigure(loaded.configuration);
        }
        Err(e) => {
            tracing::error!(error = %e, "Reloading configuration failed, keeping the old one");
        }
    }
}
