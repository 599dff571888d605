use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder. Returns a handle used to render metrics
/// for scraping.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        // Buckets: 1ms .. 30s, covering a read window plus a large replace
        .set_buckets_for_metric(
            Matcher::Suffix("duration_ms".to_string()),
            &[
                1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
                30000.0,
            ],
        )
        .context("failed to set histogram buckets")?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Register pipeline metrics at zero so they show up before the first event
pub fn initialize_pipeline_metrics() {
    // Feed
    metrics::counter!("sbs.connection.failed_total").absolute(0);
    metrics::counter!("sbs.connection.read_errors_total").absolute(0);
    metrics::counter!("sbs.bytes.received_total").absolute(0);
    metrics::counter!("sbs.lines.read_total").absolute(0);
    metrics::counter!("sbs.snapshots.decoded_total").absolute(0);

    // Ingestion
    metrics::counter!("ingest.cycles_total").absolute(0);
    metrics::counter!("ingest.snapshots_total").absolute(0);
    metrics::counter!("ingest.duplicates_total").absolute(0);
    metrics::counter!("ingest.empty_batches_total").absolute(0);
    metrics::counter!("ingest.failed_total", "stage" => "history").absolute(0);
    metrics::counter!("ingest.failed_total", "stage" => "replace").absolute(0);
    metrics::gauge!("ingest.current_rows").set(0.0);

    // Retention
    metrics::counter!("cleanup.history_deleted_total").absolute(0);
    metrics::counter!("cleanup.current_deleted_total").absolute(0);
}

/// Serve `/metrics` on `port` from an installed recorder's handle
pub async fn start_metrics_server(port: u16, handle: PrometheusHandle) -> Result<()> {
    let app = Router::new().route("/metrics", get(move || async move { handle.render() }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics server on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {}", addr))?;
    axum::serve(listener, app)
        .await
        .context("Metrics server failed")?;

    Ok(())
}
