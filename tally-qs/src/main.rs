//! tally-qs (Query Server) - Main entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tally_qs::cache::spawn_eviction_task;
use tally_qs::config::{Args, ServerConfig};
use tally_qs::{build_router, AllowListGate, AppState, MemoryResultCache, SqliteHistorySource};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(&args).context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    info!("Starting Tally Query Server (tally-qs) v{}", env!("CARGO_PKG_VERSION"));

    if let Some(parent) = config.database.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    info!("Database path: {}", config.database.display());

    let source = match SqliteHistorySource::open(&config.database).await {
        Ok(source) => {
            info!("✓ Connected to history database");
            source
        }
        Err(e) => {
            error!("Failed to open history database: {}", e);
            return Err(e.into());
        }
    };

    let gate = AllowListGate::new(config.viewers.iter().cloned());
    if gate.is_empty() {
        warn!("No viewers allowed; every query will be rejected");
    } else {
        info!("{} viewer(s) allowed", gate.len());
    }

    let cache = Arc::new(MemoryResultCache::new());
    let _eviction = spawn_eviction_task(cache.clone(), config.clear_interval);

    let state = AppState::new(cache, Arc::new(source), Arc::new(gate));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.addr))?;
    info!("tally-qs listening on http://{}", config.addr);
    info!("Health check: http://{}/health", config.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
