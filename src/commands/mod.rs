pub mod cleanup;
pub mod run;
pub mod web;

pub use cleanup::handle_cleanup;
pub use run::handle_run;
pub use web::handle_web;

use anyhow::Result;
use skytrail::aircraft_repo::{self, PgPool};
use skytrail::config::DatabaseArgs;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Connect, apply migrations and check the table layout before anything runs
async fn prepare_database(database: &DatabaseArgs) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = aircraft_repo::create_pool(&database.database_url, database.pool_size)?;

    aircraft_repo::run_migrations(&pool).await?;
    aircraft_repo::verify_schema(&pool).await?;
    info!("Database schema verified");

    Ok(pool)
}

/// Cancel `shutdown` on SIGINT or SIGTERM
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let (mut sigterm, mut sigint) = match (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
            ) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(err), _) | (_, Err(err)) => {
                    error!("Failed to register signal handlers: {}", err);
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                _ = sigint.recv() => info!("Received SIGINT (Ctrl+C), shutting down..."),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for SIGINT signal: {}", err);
                return;
            }
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }

        shutdown.cancel();
    });
}
