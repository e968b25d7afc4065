//! rlstats-sync - replay synchronization service
//!
//! Uploads replay files to the external analysis API, polls it until each
//! replay is analysed, and stores the resulting teams and players.
//!
//! Runs as an HTTP service (`serve`, the default) or as one-shot operator
//! commands that print a JSON summary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rlstats_common::events::EventBus;
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use rlstats_sync::config::{SyncConfig, DATABASE_FILE, SERVICE_NAME};
use rlstats_sync::services::{ExternalReplayClient, HttpTransport, LocalFileStore, RateLimiter};
use rlstats_sync::AppState;

/// Command-line arguments for rlstats-sync
#[derive(Parser, Debug)]
#[command(name = "rlstats-sync")]
#[command(about = "Replay synchronization service for rlstats")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "RLSTATS_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the database and stored replay files
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service and the periodic sync scheduler (default)
    Serve,
    /// Run one sync cycle over every processing/reprocessing replay
    Scan,
    /// Sync a single replay now
    Check { replay_id: Uuid },
    /// Reset completed/failed replays and queue them for sync again
    Reprocess {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        replay_id: Option<Uuid>,
        /// Reprocess every replay
        #[arg(long)]
        all: bool,
    },
    /// Upload a replay file
    Upload { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = SyncConfig::load(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting {} v{}", SERVICE_NAME, env!("CARGO_PKG_VERSION"));

    let root_folder = config.resolve_root_folder(args.root_folder.as_deref());
    let db_path = rlstats_common::config::prepare_root_folder(&root_folder, DATABASE_FILE)
        .context("Failed to initialize root folder")?;
    info!("Database: {}", db_path.display());

    let db_pool = rlstats_sync::db::init_database_pool(&db_path).await?;

    let api_key = match config.resolve_api_key() {
        Ok(key) => Some(key),
        Err(e) => {
            warn!("{}", e);
            None
        }
    };
    let transport = HttpTransport::new(&config.api, api_key)?;
    let limiter = RateLimiter::new(config.rate_limit.clone());
    let client = Arc::new(ExternalReplayClient::new(
        Arc::new(transport),
        Arc::clone(&limiter),
    ));

    let state = AppState::new(
        db_pool,
        EventBus::new(config.event_capacity),
        client,
        Arc::new(LocalFileStore::new(&root_folder)),
        config.reconciliation.mode,
    );

    let succeeded = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            serve(&config, state, &limiter).await?;
            true
        }
        Command::Scan => {
            let summary = state.scheduler.run_cycle().await;
            print_json(&summary)?;
            !summary.is_total_failure()
        }
        Command::Check { replay_id } => {
            let outcome = state.scheduler.sync_replay(replay_id).await?;
            print_json(&outcome)?;
            true
        }
        Command::Reprocess { all: true, .. } => {
            let summary = state.reprocessor.reprocess_all().await;
            print_json(&summary)?;
            !summary.is_total_failure()
        }
        Command::Reprocess { replay_id, .. } => {
            let replay_id = replay_id.context("A replay id or --all is required")?;
            let report = state.reprocessor.reprocess_one(replay_id).await?;
            print_json(&report)?;
            true
        }
        Command::Upload { path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let outcome = state.uploader.upload(bytes, &file_name).await?;
            print_json(&outcome)?;
            true
        }
    };

    limiter.shutdown();

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

async fn serve(config: &SyncConfig, state: AppState, limiter: &Arc<RateLimiter>) -> Result<()> {
    let cancel = CancellationToken::new();

    let stats_reporter = limiter.spawn_stats_reporter(config.rate_limit.stats_interval());
    let scheduler = if config.scheduler.enabled {
        Some(
            Arc::clone(&state.scheduler)
                .spawn(config.scheduler.poll_interval(), cancel.child_token()),
        )
    } else {
        info!("Sync scheduler disabled by configuration");
        None
    };

    let app = rlstats_sync::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);
    info!("Health check: http://{}/health", config.bind_address);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    cancel.cancel();
    limiter.shutdown();
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
    }
    stats_reporter.abort();

    info!("Server shutdown complete");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
