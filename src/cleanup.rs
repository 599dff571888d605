use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures_util::FutureExt;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::scheduler::Job;
use crate::store::{SnapshotStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupConfig {
    /// History rows this many days older than the newest row are removed
    pub max_days_history: i64,
    /// Current rows this many seconds older than the newest row are removed
    pub current_window_seconds: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_days_history: 1,
            current_window_seconds: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub history_deleted: usize,
    pub current_deleted: usize,
}

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("a cleanup run is already in progress")]
    AlreadyRunning,
    #[error("failed to prune history: {0}")]
    History(#[source] StoreError),
    #[error("failed to prune current view: {0}")]
    Current(#[source] StoreError),
}

/// Clears the running flag when a run ends, including by panic
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Retention pass over both tables. At most one run is active at a time.
pub struct CleanupJob {
    store: Arc<dyn SnapshotStore>,
    config: CleanupConfig,
    running: AtomicBool,
}

impl CleanupJob {
    pub fn new(store: Arc<dyn SnapshotStore>, config: CleanupConfig) -> Self {
        Self {
            store,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<CleanupReport, CleanupError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CleanupError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        let started = Instant::now();
        // The two prunes are independent; a failed one does not skip the other
        let history = self.store.prune_history(self.config.max_days_history).await;
        let current = self
            .store
            .prune_current(self.config.current_window_seconds)
            .await;
        metrics::histogram!("cleanup.duration_ms").record(started.elapsed().as_millis() as f64);

        if let Ok(deleted) = &history {
            metrics::counter!("cleanup.history_deleted_total").increment(*deleted as u64);
        }
        if let Ok(deleted) = &current {
            metrics::counter!("cleanup.current_deleted_total").increment(*deleted as u64);
        }

        match (history, current) {
            (Ok(history_deleted), Ok(current_deleted)) => Ok(CleanupReport {
                history_deleted,
                current_deleted,
            }),
            (Err(e), current) => {
                match current {
                    Ok(deleted) => info!("Removed {} stale current rows", deleted),
                    Err(current_err) => error!("Failed to prune current view: {}", current_err),
                }
                Err(CleanupError::History(e))
            }
            (Ok(_), Err(e)) => Err(CleanupError::Current(e)),
        }
    }

    /// Run once and log the outcome. Failures never propagate to the caller.
    pub async fn execute(&self) {
        match self.run().await {
            Ok(report) => {
                metrics::counter!("cleanup.runs_total", "outcome" => "success").increment(1);
                info!(
                    "Old history data deleted: {} history rows, {} stale current rows",
                    report.history_deleted, report.current_deleted
                );
            }
            Err(CleanupError::AlreadyRunning) => {
                metrics::counter!("cleanup.runs_total", "outcome" => "skipped").increment(1);
                warn!("Previous cleanup still running, skipping this run");
            }
            Err(e) => {
                metrics::counter!("cleanup.runs_total", "outcome" => "failed").increment(1);
                error!("Cleanup failed: {}", e);
            }
        }
    }

    /// Callback form for a [`crate::scheduler::Scheduler`]
    pub fn into_job(self: Arc<Self>) -> Job {
        Arc::new(move || {
            let job = self.clone();
            async move { job.execute().await }.boxed()
        })
    }
}
