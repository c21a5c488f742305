//! kanbantime server - Main entry point.
//!
//! This binary starts the local timer core with:
//! - Structured JSON logging
//! - State restored from the data directory
//! - A periodic sync that retries failed writes and drops stale timers
//! - Graceful shutdown handling (SIGTERM/SIGINT) with a final sync
//!
//! # Configuration
//!
//! See [`kanbantime_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Development mode (no auth)
//! KANBANTIME_UNSAFE_NO_AUTH=true cargo run --bin kanbantime-server
//!
//! # Normal mode
//! KANBANTIME_TOKEN="secret-token" \
//! KANBANTIME_PORT=7421 \
//! cargo run --release --bin kanbantime-server
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use kanbantime_server::broadcast::TimerBroadcaster;
use kanbantime_server::config::Config;
use kanbantime_server::persistence::JsonFileStore;
use kanbantime_server::routes::{create_router, AppState};
use kanbantime_server::tracker::TrackerService;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables (when auth enabled):");
            eprintln!("  KANBANTIME_TOKEN              - Token shared with the detector and banner");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  KANBANTIME_PORT               - HTTP port on 127.0.0.1 (default: 7421)");
            eprintln!("  KANBANTIME_DATA_DIR           - State directory (default: platform data dir)");
            eprintln!("  KANBANTIME_SYNC_INTERVAL_SECS - Periodic sync interval (default: 300)");
            eprintln!("  RUST_LOG                      - Log level filter (default: info)");
            eprintln!("  KANBANTIME_UNSAFE_NO_AUTH     - Disable auth (dev only, set to 'true')");
            return ExitCode::from(1);
        }
    };

    let auth_mode = if config.unsafe_no_auth {
        "disabled (UNSAFE)"
    } else {
        "enabled"
    };
    info!(
        port = config.port,
        auth_mode = auth_mode,
        data_dir = %config.data_dir.display(),
        "kanbantime server starting"
    );

    let kv = match JsonFileStore::open(&config.data_dir) {
        Ok(kv) => kv,
        Err(err) => {
            error!(error = %err, data_dir = %config.data_dir.display(), "Failed to open data directory");
            return ExitCode::from(1);
        }
    };
    info!(path = %kv.path().display(), "Using state file");

    let broadcaster = TimerBroadcaster::new();
    let tracker = match TrackerService::load(Arc::new(kv), broadcaster.clone(), Utc::now()).await {
        Ok(tracker) => Arc::new(tracker),
        Err(err) => {
            error!(error = %err, "Failed to load tracker state");
            return ExitCode::from(1);
        }
    };

    let sync_handle = spawn_sync_task(Arc::clone(&tracker), config.sync_interval);
    info!(interval_secs = config.sync_interval.as_secs(), "Periodic sync task started");

    let bind_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.port));
    let state = AppState::new(config, Arc::clone(&tracker), broadcaster);
    let app = create_router(state);

    let listener = match TcpListener::bind(bind_addr).await {
        Ok(listener) => {
            info!(address = %bind_addr, "Server listening");
            listener
        }
        Err(err) => {
            error!(error = %err, address = %bind_addr, "Failed to bind to address");
            return ExitCode::from(1);
        }
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    info!("Server ready to accept connections");

    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutting down gracefully");
    sync_handle.abort();

    match tracker.sync().await {
        Ok(report) => info!(swept = report.swept, wrote = report.wrote, "Final sync complete"),
        Err(err) => {
            error!(error = %err, "Final sync failed, unsaved changes are lost");
            return ExitCode::from(1);
        }
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Runs [`TrackerService::sync`] every `interval`.
fn spawn_sync_task(tracker: Arc<TrackerService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match tracker.sync().await {
                Ok(report) if report.swept > 0 => {
                    info!(swept = report.swept, "Dropped stale timers");
                }
                Ok(report) => debug!(wrote = report.wrote, "Periodic sync complete"),
                Err(err) => warn!(error = %err, "Periodic sync failed, will retry"),
            }
        }
    })
}

/// JSON logs filtered by `RUST_LOG`, default `info`.
fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry().with(env_filter).with(json_layer).init();
}

/// Resolves on SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
