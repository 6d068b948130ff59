//! Monolith Binary - Local deployment
//!
//! This is the main entry point for local development and single-server deployment.
//! It wires up:
//! - Local adapters (in-memory record store, ffmpeg, filesystem)
//! - The ingestion pool
//! - The HTTP inbound adapter

use std::sync::Arc;
use tapedeck::adapters::local::http::{self, AppState};
use tapedeck::adapters::local::{FfmpegTransform, InMemoryRecordStore};
use tapedeck::{IngestionPool, LocalConfig, Orchestrator, Segmenter};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "monolith stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = LocalConfig::from_env()?;

    tokio::fs::create_dir_all(&config.storage_root).await?;
    tokio::fs::create_dir_all(&config.spool_dir).await?;

    // 1. Adapters (Local implementations)
    let store = InMemoryRecordStore::new();
    let transform = FfmpegTransform::new(config.ffmpeg());

    // 2. Application Services
    let segmenter = Segmenter::new(transform, config.layout());
    let orchestrator = Orchestrator::new(store, segmenter);
    let pool = Arc::new(IngestionPool::new(
        orchestrator,
        config.max_concurrent_ingestions,
    ));

    // 3. HTTP Layer
    let app = http::router(AppState {
        pool: pool.clone(),
        spool_dir: config.spool_dir.clone(),
    });

    // 4. Start Server
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!(
        addr = %config.bind_addr(),
        storage_root = %config.storage_root.display(),
        max_concurrent = config.max_concurrent_ingestions,
        "listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Running and queued ingestions all end as failed(cancelled).
    pool.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
