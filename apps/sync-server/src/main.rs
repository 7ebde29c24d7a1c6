//! # Beacon Sync Server
//!
//! HTTP/SSE server in front of the sync engine.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Sync Server                                    │
//! │                                                                         │
//! │  Dashboard ───► HTTP (8080) ───► SyncService ───► SQLite                │
//! │      ▲                                │                                 │
//! │      │                                ▼                                 │
//! │      └────────── SSE ◄──── Orchestrator ───► Business API (REST)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Shutdown (Ctrl+C / SIGTERM) cancels every live run; each one pauses at its
//! next yield point and can be resumed later.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use beacon_db::{Database, DbConfig};
use beacon_sync::{RestClientFactory, SyncConfig, SyncService};
use beacon_sync_server::{router, AppState};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,beacon=debug")),
        )
        .with_target(true)
        .init();

    info!("Starting Beacon sync server...");

    let config_path = std::env::var_os("BEACON_CONFIG").map(PathBuf::from);
    let config = Arc::new(SyncConfig::load(config_path).context("loading configuration")?);
    info!(
        addr = %config.server.bind_address(),
        database = %config.server.database_path.display(),
        api = %config.api.base_url,
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(config.server.database_path.clone()))
        .await
        .context("opening database")?;
    info!("Database ready");

    let shutdown = CancellationToken::new();
    let clients = Arc::new(RestClientFactory::new(config.api.clone()));
    let service = SyncService::new(db.clone(), config.clone(), clients, shutdown.clone());
    let sweeper = service.spawn_maintenance();

    let app = router(AppState::new(service, db.clone()));
    let listener = TcpListener::bind(config.server.bind_address())
        .await
        .with_context(|| format!("binding {}", config.server.bind_address()))?;
    info!(addr = %config.server.bind_address(), "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("serving HTTP")?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Retention sweeper ended abnormally");
    }
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then cancels `shutdown` so live runs pause
/// and their streams close before the server stops.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, pausing live runs...");
    shutdown.cancel();
}
