use std::sync::Arc;

use anyhow::{Context, Result};
use skytrail::aircraft_repo::PgSnapshotStore;
use skytrail::cleanup::CleanupJob;
use skytrail::config::{DatabaseArgs, PipelineConfig};
use tracing::info;

/// Run one retention pass and exit. Unlike the scheduled job, failures are
/// returned so the exit status reflects them.
pub async fn handle_cleanup(database: DatabaseArgs, config: PipelineConfig) -> Result<()> {
    config.validate().context("Invalid pipeline configuration")?;

    let pool = super::prepare_database(&database).await?;
    let job = CleanupJob::new(
        Arc::new(PgSnapshotStore::new(pool)),
        config.cleanup_config(),
    );

    let report = job.run().await.context("Cleanup failed")?;
    info!(
        "Deleted {} history rows older than {} days and {} stale current rows",
        report.history_deleted, config.max_days_history, report.current_deleted
    );

    Ok(())
}
