use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use scenelog_daemon::connection::ObsConnection;
use scenelog_daemon::correlator::RequestCorrelator;
use scenelog_daemon::monitor::{day_key, Monitor};
use scenelog_daemon::poller::ScenePoller;
use scenelog_daemon::report::{format_dates, format_report};
use scenelog_daemon::server::NotifyServer;
use scenelog_daemon::store::Store;

const DEFAULT_DB: &str = "scenelog.db";

#[derive(Parser)]
#[command(name = "scenelog", about = "OBS source visibility tracker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the tracking daemon (default when no subcommand given)
    Daemon {
        /// OBS websocket host
        #[arg(long, default_value = "127.0.0.1")]
        obs_host: String,

        /// OBS websocket port
        #[arg(long, default_value_t = 4455)]
        obs_port: u16,

        /// Listen address for observer WebSocket connections
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,

        /// SQLite database path
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,

        /// Inventory poll interval in milliseconds
        #[arg(long, default_value_t = 2000)]
        poll_interval_ms: u64,
    },
    /// Print one day's visibility report (one-shot)
    Report {
        /// SQLite database path
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,

        /// Day to report, YYYY-MM-DD. Defaults to today.
        #[arg(long)]
        date: Option<String>,
    },
    /// List days with recorded data
    Dates {
        /// SQLite database path
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing. Respects RUST_LOG env var, defaults to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        // Default to daemon when no subcommand is given.
        None => {
            run_daemon(
                "127.0.0.1".into(),
                4455,
                "127.0.0.1:8080".parse().expect("default listen address"),
                PathBuf::from(DEFAULT_DB),
                2000,
            )
            .await?;
        }
        Some(Commands::Daemon {
            obs_host,
            obs_port,
            listen,
            db,
            poll_interval_ms,
        }) => {
            run_daemon(obs_host, obs_port, listen, db, poll_interval_ms).await?;
        }
        Some(Commands::Report { db, date }) => {
            let store = Store::open(&db)?;
            let date = date.unwrap_or_else(|| day_key(Utc::now()));
            let rows = store.read_day(&date)?;
            print!("{}", format_report(&date, &rows));
        }
        Some(Commands::Dates { db }) => {
            let store = Store::open(&db)?;
            print!("{}", format_dates(&store.list_dates()?));
        }
    }

    Ok(())
}

async fn run_daemon(
    obs_host: String,
    obs_port: u16,
    listen: SocketAddr,
    db: PathBuf,
    poll_interval_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let obs_url = format!("ws://{obs_host}:{obs_port}");
    tracing::info!(
        obs_url = %obs_url,
        listen = %listen,
        db = %db.display(),
        poll_interval_ms,
        "starting scenelog daemon"
    );

    let store = Store::open(&db)?;

    // Channels: outbound frames (correlator -> connection), readiness
    // (connection -> correlator/poller), notifications (monitor -> observers).
    let (out_tx, out_rx) = mpsc::channel(32);
    let (ready_tx, ready_rx) = watch::channel(false);
    let (notify_tx, _notify_rx) = broadcast::channel(64);

    let monitor = Monitor::shared(store, notify_tx.clone());
    let correlator = RequestCorrelator::new(out_tx, ready_rx.clone());

    let connection = ObsConnection::new(
        obs_url,
        out_rx,
        ready_tx,
        correlator.clone(),
        monitor.clone(),
    );
    let poller = ScenePoller::new(
        correlator,
        ready_rx,
        monitor.clone(),
        Duration::from_millis(poll_interval_ms),
    );

    let cancel = CancellationToken::new();
    let server = NotifyServer::new(listen, monitor, notify_tx, cancel.clone());

    tokio::select! {
        _ = connection.run() => {
            tracing::warn!("connection task exited unexpectedly");
        }
        _ = poller.run() => {
            tracing::warn!("poller exited unexpectedly");
        }
        result = server.run() => {
            match result {
                Ok(()) => tracing::warn!("notify server exited unexpectedly"),
                Err(e) => tracing::warn!("notify server error: {e}"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    cancel.cancel();
    tracing::info!("scenelog daemon stopped");
    Ok(())
}
