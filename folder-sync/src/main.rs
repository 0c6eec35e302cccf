//! Folder Sync - Main entry point
//!
//! Mirrors a source folder into a replica folder on a fixed interval.

use anyhow::{Context, Result};
use clap::Parser;
use folder_sync::config::{Config, Overrides, SyncTarget};
use folder_sync::daemon::shutdown::ShutdownCoordinator;
use folder_sync::{utils, SyncService};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the source folder
    source: Option<PathBuf>,

    /// Path to the replica folder
    replica: Option<PathBuf>,

    /// Interval between synchronization runs (in seconds)
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,

    /// Path to the log file
    log_file: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?
    } else {
        Config::default()
    };

    let config = config.with_overrides(Overrides {
        source: args.source,
        replica: args.replica,
        interval_secs: args.interval,
        log_file: args.log_file,
        log_level: args.log_level,
    });
    config.validate()?;

    // Initialize logging
    let _log_guard = utils::logger::init(&config.log.level, config.log_file()?)?;

    tracing::info!("Starting folder-sync v{}", env!("CARGO_PKG_VERSION"));

    let target = match SyncTarget::from_config(&config) {
        Ok(target) => target,
        Err(e) => {
            tracing::error!("Startup validation failed: {}", e);
            return Err(e.into());
        }
    };
    let service = SyncService::new(target);

    // Create shutdown coordinator
    let shutdown_coordinator = ShutdownCoordinator::new();
    let sync_handle = tokio::spawn(service.run(shutdown_coordinator.token()));

    // Wait for shutdown signal
    shutdown_coordinator.wait_for_signal().await;

    tracing::info!("Waiting for the current sync cycle to finish");
    if let Err(e) = sync_handle.await {
        tracing::error!("Sync task panicked: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
