use std::sync::Arc;

use anyhow::{Context, Result};
use skytrail::aircraft_repo::PgSnapshotStore;
use skytrail::cleanup::CleanupJob;
use skytrail::config::{DatabaseArgs, PipelineConfig};
use skytrail::ingestion::IngestionPipeline;
use skytrail::poll_loop::PollLoop;
use skytrail::scheduler::{CronScheduler, Scheduler};
use skytrail::store::SnapshotStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Ingest the SBS feed until shutdown, with retention on a cron schedule
pub async fn handle_run(database: DatabaseArgs, config: PipelineConfig) -> Result<()> {
    config.validate().context("Invalid pipeline configuration")?;

    let pool = super::prepare_database(&database).await?;
    let store: Arc<dyn SnapshotStore> = Arc::new(PgSnapshotStore::new(pool));

    let shutdown = CancellationToken::new();
    super::spawn_signal_handler(shutdown.clone());

    let cleanup = Arc::new(CleanupJob::new(store.clone(), config.cleanup_config()));
    let mut scheduler = CronScheduler::new(shutdown.child_token());
    scheduler
        .schedule(&config.cleanup_schedule, cleanup.into_job())
        .context("Failed to schedule cleanup job")?;
    scheduler.start();
    info!(
        "Cleanup scheduled on '{}' (keeping {} days of history)",
        config.cleanup_schedule, config.max_days_history
    );

    let poll_loop = PollLoop::new(&config, IngestionPipeline::new(store));
    let result = poll_loop.run(shutdown.clone()).await;

    shutdown.cancel();
    scheduler.shutdown().await;
    info!("Shutdown complete");

    result
}
