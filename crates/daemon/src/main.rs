mod cli;
mod logging;
mod watch;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use animanager_core::{
    create_torrent_client, load_config_or_default, validate_config, CacheStore, CycleReport,
    LibraryManager, LocalFileSystem, ReconcileOptions, SanitizedConfig,
};

use cli::{Cli, Command};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Logging may not be up yet, so the error goes straight to stderr.
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config_or_default(cli.config.as_deref())
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    cli.apply(&mut config);
    config.logging.file = config.log_file();
    validate_config(&config).context("Configuration validation failed")?;

    let _log_guard = logging::init(&config.logging)?;
    info!("animanager {} starting", VERSION);
    debug!("Configuration: {:?}", SanitizedConfig::from(&config));

    let database = config
        .database
        .clone()
        .context("No declaration configured")?;
    let cache_dir = config
        .cache_dir
        .clone()
        .context("No cache directory configured")?;

    let client =
        create_torrent_client(&config.torrent_client).context("Failed to create torrent client")?;
    let mut manager = LibraryManager::new(
        database,
        CacheStore::new(&cache_dir),
        client,
        Arc::new(LocalFileSystem::new()),
        ReconcileOptions::from(&config),
    );

    match cli.command {
        Command::Update => {
            let report = manager.reload().await.context("Reconciliation failed")?;
            watch::log_report(&report);
        }
        Command::Plan => {
            let report = manager.reload().await.context("Planning failed")?;
            print_plan(&report);
        }
        Command::Watch => {
            watch::run(
                &mut manager,
                Duration::from_millis(config.watch.poll_interval_ms),
            )
            .await?;
        }
    }

    Ok(())
}

fn print_plan(report: &CycleReport) {
    if report.is_noop() {
        println!("Nothing to do.");
    }
    for action in &report.performed {
        println!("{}", action);
    }
    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
}
