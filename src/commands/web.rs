use std::sync::Arc;

use anyhow::Result;
use skytrail::aircraft_repo::PgSnapshotStore;
use skytrail::config::{DatabaseArgs, WebArgs};
use skytrail::web::start_web_server;
use tokio_util::sync::CancellationToken;

/// Serve the GeoJSON read API
pub async fn handle_web(database: DatabaseArgs, web: WebArgs) -> Result<()> {
    let pool = super::prepare_database(&database).await?;

    let shutdown = CancellationToken::new();
    super::spawn_signal_handler(shutdown.clone());

    start_web_server(
        web.interface,
        web.port,
        Arc::new(PgSnapshotStore::new(pool)),
        shutdown,
    )
    .await
}
