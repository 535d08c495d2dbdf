//! # Cadence Worker
//!
//! Loads configuration, connects the Redis backend, merges the built-in
//! `system` router and runs dispatchers until Ctrl+C or SIGTERM.

use anyhow::Context;
use cadence_config::ConfigLoader;
use cadence_core::init_telemetry;
use cadence_jobs::{register_metrics, JobsEngine, RedisBackend};
use cadence_server::startup::print_startup_info;
use cadence_server::system::{self, WorkerState};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Worker error: {:#}", e);
        eprintln!("cadence-worker: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_loader = ConfigLoader::from_default_location().context("loading configuration")?;
    let config = config_loader.get().await;

    init_telemetry(&config.telemetry).context("initialising telemetry")?;
    register_metrics();

    info!("Starting Cadence worker...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let backend = RedisBackend::connect(&config.jobs.redis)
        .await
        .context("connecting to Redis")?;
    backend.health_check().await.context("Redis health check")?;

    let state = WorkerState::new();
    let engine = JobsEngine::builder(Arc::new(backend))
        .config(config.jobs.clone())
        .context_factory(state.context_factory())
        .build()?;

    engine.merge(vec![system::router()]).await?;
    print_startup_info(&config.app.environment, &config.jobs.redis.url, &engine.queue_names());

    shutdown_signal().await;

    engine.shutdown().await?;
    info!(heartbeats = state.heartbeats(), "Worker shutdown complete");
    Ok(())
}

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
            Ok(mut stream) => {
                stream.recv().await;
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
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
