//! fleetd - cluster orchestration daemon
//!
//! Runs the health monitor, autoscaler and node lifecycle manager for one
//! managed cluster and exposes the operator API.

use anyhow::Result;
use fleet_lib::Orchestrator;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fleetd::{api, config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting fleetd");

    let config = config::DaemonConfig::load()?;
    info!(cluster = %config.orchestrator.cluster_name, "Daemon configured");

    let orchestrator = Arc::new(Orchestrator::new(config.orchestrator)?);
    orchestrator.start().await;

    let app_state = Arc::new(api::AppState::new(orchestrator.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("SIGINT received, shutting down");

    orchestrator.shutdown().await;
    api_handle.abort();

    Ok(())
}
