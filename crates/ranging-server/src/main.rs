//! # ranging-server
//!
//! HTTP server for the beacon ranging coordinator.
//!
//! This binary provides:
//! - REST API for ranging requests, session status, and stop
//! - Simulated radio control for hosts without Bluetooth hardware
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, default configuration
//! cargo run --package ranging-server
//!
//! # Explicit configuration file
//! ./ranging-server /etc/beacon-ranging/config.toml
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;

use ranging_core::{BeaconRangingCoordinator, RangingConfig};
use ranging_server::{api, logging, state::AppState};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = RangingConfig::load(config_path.as_deref())?;

    logging::init(&config.logging)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.radio.backend,
        timeout_secs = config.ranging.timeout_secs,
        "Starting ranging-server"
    );

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;

    let state = AppState::new(config).await?;
    let coordinator = state.coordinator.clone();
    let app = api::create_router(state);

    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(coordinator))
        .await?;

    info!("ranging-server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, after stopping any active session so waiting
/// requests are answered before connections drain.
async fn shutdown_signal(coordinator: Arc<BeaconRangingCoordinator>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    let stopped = coordinator.stop_ranging();
    info!(stopped, "Shutdown requested, ranging stopped");
}
