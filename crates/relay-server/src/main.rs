//! # Relay Server
//!
//! Real-time channel relay over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (in-memory store)
//! relay
//!
//! # Run with a config file
//! relay /path/to/relay.toml
//!
//! # Run with environment variables
//! RELAY_PORT=8080 RELAY_HOST=0.0.0.0 DATABASE_URL=postgresql://localhost/relay relay
//! ```

use anyhow::{Context, Result};
use relay_server::{config::Config, handlers, metrics, shutdown, AppState};
use relay_store::{MemoryStore, MessageStore, PgMessageStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let explicit = std::env::args().nth(1);
    let config = Config::load(explicit.as_deref())?;

    info!("Starting relay server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let store = open_store(&config).await?;
    info!(backend = store.backend(), "Message store ready");

    let state = Arc::new(AppState::new(config.clone(), store));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = state
        .relay
        .liveness_monitor(config.heartbeat.interval())
        .spawn(shutdown_rx, metrics::record_sweep);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    handlers::serve(listener, state, async move {
        shutdown::signal().await;
        let _ = shutdown_tx.send(true);
    })
    .await?;

    monitor.await.context("Liveness monitor panicked")?;
    info!("Relay server stopped");

    Ok(())
}

/// Open the configured message store.
async fn open_store(config: &Config) -> Result<Arc<dyn MessageStore>> {
    match config.store.postgres() {
        Some(pg) => {
            let store = PgMessageStore::connect(&pg)
                .await
                .context("Failed to connect to PostgreSQL")?;
            store
                .ensure_schema()
                .await
                .context("Failed to prepare relay schema")?;
            Ok(Arc::new(store))
        }
        None => {
            info!("No database_url configured, keeping messages in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
