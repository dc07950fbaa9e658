//! # Flexgraph Server
//!
//! Polls a Redis keyspace for `prefix:instrument:timestamp` JSON records,
//! keeps a bounded time-ordered history per instrument and serves snapshots
//! and controls over a small JSON API for chart renderers.
//!
//! ## Tasks
//! - **upstream**: the engine poller (scan, parse, insert) with backoff.
//! - **downstream**: the axum HTTP API.
//! - **monitor**: warns when the store stops delivering new records.
//!
//! All three share one `CancellationToken`, cancelled on Ctrl-C or SIGTERM.

use anyhow::{Context, Result};
use lib_flexgraph::loggers::{LogSettings, init_tracing};
use lib_flexgraph::{IngestMetrics, InstrumentRegistry, Poller};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod flexgraph_logic;
use flexgraph_logic::{config, display, downstream, monitor, state, upstream};

const APP_NAME: &str = "server_flexgraph";

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(_) => std::future::pending::<()>().await,
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;
    let _log_guard = init_tracing(&LogSettings::new(config.log_dir(), config.log_level(), APP_NAME))
        .context("Failed to initialise logging")?;

    let engine = config.engine_config()?;
    info!(
        port = config.port(),
        key_pattern = %engine.key_pattern,
        capacity = engine.buffer_capacity,
        "Starting {}",
        APP_NAME
    );

    let redis_url = config.redis_url.clone().unwrap_or_else(|| "redis://127.0.0.1/".to_string());
    let store = upstream::connect_store(&redis_url).await?;

    let registry = Arc::new(InstrumentRegistry::new(engine.buffer_capacity));
    let metrics = Arc::new(IngestMetrics::new());
    let (poller, ingest_tx) = Poller::new(engine.clone(), store, Arc::clone(&registry), Arc::clone(&metrics))
        .context("Failed to build poller")?;

    let display_dir = config.display_dir.clone().unwrap_or_else(|| PathBuf::from("./config"));
    let app_state = state::AppState::new(
        registry,
        engine.window_anchor,
        metrics,
        display::DisplayTables::load(&display_dir),
        ingest_tx,
    );

    let shutdown = CancellationToken::new();

    let upstream_handle = tokio::spawn(upstream::run(poller, shutdown.clone()));

    let downstream_handle = {
        let (port, app_state, shutdown) = (config.port(), app_state.clone(), shutdown.clone());
        tokio::spawn(async move {
            let served = downstream::run(port, app_state, shutdown.clone()).await;
            if served.is_err() {
                shutdown.cancel();
            }
            served
        })
    };

    let monitor_handle = tokio::spawn(monitor::run(
        app_state.clone(),
        Duration::from_secs(config.stall_check_interval_seconds.unwrap_or(10).max(1)),
        Duration::from_secs(config.stall_threshold_seconds.unwrap_or(60)),
        shutdown.clone(),
    ));

    tokio::select! {
        _ = wait_for_signal() => {}
        _ = shutdown.cancelled() => {
            info!("Internal failure, initiating shutdown.");
        }
    }

    // Send shutdown signal to all components
    shutdown.cancel();

    // Wait for components to shut down
    let (_, served, _) = tokio::try_join!(upstream_handle, downstream_handle, monitor_handle)?;
    served.context("HTTP server failed")?;

    info!("Shutdown complete.");
    Ok(())
}
