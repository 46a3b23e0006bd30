//! HTTP surface: job creation, long-poll progress, and artifact download.

pub mod api;
pub mod artifacts;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use api::{AppState, SharedState, api_router};
pub use artifacts::ArtifactStore;

use crate::config::TopomapToml;
use crate::limiter::ConcurrencyLimiter;

/// Build the full application router.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let app = api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Start the HTTP server and run until Ctrl+C.
pub async fn start_server(config: &TopomapToml) -> Result<()> {
    let mut config = config.clone();
    let temp_folder = &config.storage.temp_folder;
    tokio::fs::create_dir_all(temp_folder)
        .await
        .with_context(|| format!("Failed to create temp folder {}", temp_folder.display()))?;
    config.storage.temp_folder = tokio::fs::canonicalize(temp_folder)
        .await
        .with_context(|| format!("Failed to resolve temp folder {}", temp_folder.display()))?;
    let config = &config;

    let runner = Arc::new(config.worker.runner());
    let state = Arc::new(AppState::new(runner, config));
    state.artifacts.ensure_dirs().await?;

    let app = build_router(Arc::clone(&state), config.server.dev_mode);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        max_concurrent = state.limiter.capacity(),
        temp_folder = %state.artifacts.root().display(),
        "topomap listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.limiter.clone()))
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Resolves on Ctrl+C. Queued jobs are refused so shutdown only waits for
/// the jobs already running.
async fn shutdown_signal(limiter: ConcurrencyLimiter) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
    limiter.close();
}
