use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use animanager_core::{CycleReport, ErrorClass, LibraryManager};

/// Runs a cycle, then polls the declaration until a shutdown signal.
///
/// A cycle is re-run when the declaration's modification time changes, when
/// the previous cycle failed with a retryable error, or when patterns were
/// deferred. Signals are only observed between cycles.
pub async fn run(manager: &mut LibraryManager, poll_interval: Duration) -> Result<()> {
    let mut last_modified = modified(manager.database_path()).await;
    let mut rerun = cycle(manager).await?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    info!(
        "Watching {:?} every {:?}",
        manager.database_path(),
        poll_interval
    );
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let current = modified(manager.database_path()).await;
        let changed = current != last_modified;
        if !changed && !rerun {
            continue;
        }
        if changed {
            info!("Declaration changed, reconciling");
            last_modified = current;
        } else {
            debug!("Retrying the last cycle");
        }
        rerun = cycle(manager).await?;
    }
}

/// One cycle. Returns whether the next poll should run another cycle even
/// without a change; only process-fatal failures are returned as errors.
pub async fn cycle(manager: &mut LibraryManager) -> Result<bool> {
    match manager.reload().await {
        Ok(report) => {
            log_report(&report);
            Ok(report.needs_rerun())
        }
        Err(e) if e.is_process_fatal() => {
            Err(anyhow::Error::new(e).context("Cannot continue without a usable cache"))
        }
        Err(e) => {
            error!("Cycle failed ({}): {}", e.class(), e);
            Ok(e.class() == ErrorClass::Retryable)
        }
    }
}

pub fn log_report(report: &CycleReport) {
    for action in &report.performed {
        info!("{}", action);
    }
    for warning in &report.warnings {
        warn!("{}", warning);
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.modified().ok(),
        Err(e) => {
            debug!("Cannot stat {:?}: {}", path, e);
            None
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
