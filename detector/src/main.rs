//! kanbantime detector - kanban board status change detection.
//!
//! This binary reads page events from the browser shim on stdin and relays
//! detected status changes to the kanbantime timer core.
//!
//! # Commands
//!
//! - `kanbantime-detector run --service <backlog|github>`: Start detecting
//!
//! stdout carries notices for the shim, so all logging goes to stderr.
//!
//! # Environment Variables
//!
//! See the [`config`](kanbantime_detector::config) module for available
//! configuration options.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kanbantime_detector::config::Config;
use kanbantime_detector::pipeline::{forward_page_events, write_notices, Pipeline, EVENT_CHANNEL_CAPACITY};
use kanbantime_detector::{ChangeDeduplicator, Relay, RelayConfig, Service, ServiceProfile, StatusLedger};

/// kanbantime detector - kanban board status change detection.
///
/// Reads newline-delimited page events on stdin and forwards detected
/// status changes to the timer core.
#[derive(Parser, Debug)]
#[command(name = "kanbantime-detector")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    KANBANTIME_SERVER_URL       Timer core URL (default: http://127.0.0.1:7421)
    KANBANTIME_TOKEN            Bearer token for the timer core
    KANBANTIME_DEBOUNCE_MS      Per-task deduplication window (default: 1500)
    KANBANTIME_LEDGER_CAPACITY  Task statuses remembered (default: 2000)

EXAMPLES:
    # Detect on a Backlog board
    kanbantime-detector run --service backlog
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start detecting status changes.
    ///
    /// Runs until stdin is closed.
    Run {
        /// Kanban service the board belongs to (backlog or github).
        #[arg(short, long)]
        service: Service,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { service } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            runtime.block_on(run_detector(service))
        }
    }
}

/// Runs the detector until stdin closes.
async fn run_detector(service: Service) -> Result<()> {
    init_logging();

    info!(service = %service, "Starting kanbantime detector");

    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        server_url = %config.server_url,
        auth = config.token.is_some(),
        debounce_ms = config.debounce.as_millis() as u64,
        "Configuration loaded"
    );

    let relay = Relay::new(RelayConfig::new(config.server_url.clone(), config.token.clone()))
        .context("Failed to create HTTP client")?;

    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let pipeline = Pipeline::new(
        ServiceProfile::for_service(service),
        StatusLedger::new(config.ledger_capacity),
        ChangeDeduplicator::new(config.debounce),
        relay,
        notice_tx,
    );

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let pipeline_task = tokio::spawn(pipeline.run(event_rx));
    let notice_task = tokio::spawn(write_notices(notice_rx, tokio::io::stdout()));

    let forwarded = forward_page_events(BufReader::new(tokio::io::stdin()), event_tx)
        .await
        .context("Failed to read page events")?;
    info!(forwarded, "Page event stream closed");

    let stats = pipeline_task.await.context("Pipeline task panicked")?;
    if stats.dropped > 0 {
        error!(dropped = stats.dropped, "Some changes could not be delivered");
    }

    if let Err(e) = notice_task.await.context("Notice task panicked")? {
        error!(error = %e, "Failed to write notices");
    }

    info!("Detector stopped");
    Ok(())
}

/// Initializes the logging subsystem on stderr.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}
