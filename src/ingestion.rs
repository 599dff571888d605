use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info};

use crate::aircraft::{AircraftSnapshot, FIELDS_PER_ROW};
use crate::store::{SnapshotStore, StoreError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to carry current view into history: {0}")]
    HistoryAppend(#[source] StoreError),
    #[error("failed to replace current view: {0}")]
    ReplaceView(#[source] StoreError),
}

impl IngestError {
    /// Whether retrying the next cycle is pointless
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestError::HistoryAppend(e) | IngestError::ReplaceView(e) => e.is_fatal(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Snapshots handed to the pipeline
    pub received: usize,
    /// Snapshots dropped because a later one shared their key
    pub duplicates: usize,
    /// History rows written by carry-forward
    pub carried_forward: usize,
    /// Rows now in the current view
    pub current_rows: usize,
    pub chunks: usize,
}

/// Rows per insert statement given a bind parameter ceiling
pub fn chunk_size(max_params: usize, fields_per_row: usize) -> usize {
    (max_params / fields_per_row.max(1)).max(1)
}

/// Keep one snapshot per `(icao, timestamp)`, the last one seen. First
/// appearance order is preserved.
pub fn dedupe_batch(batch: Vec<AircraftSnapshot>) -> Vec<AircraftSnapshot> {
    let mut positions: HashMap<(String, NaiveDateTime), usize> = HashMap::with_capacity(batch.len());
    let mut deduped: Vec<AircraftSnapshot> = Vec::with_capacity(batch.len());

    for snapshot in batch {
        let key = (snapshot.icao.clone(), snapshot.timestamp);
        match positions.get(&key) {
            Some(&index) => deduped[index] = snapshot,
            None => {
                positions.insert(key, deduped.len());
                deduped.push(snapshot);
            }
        }
    }

    deduped
}

/// Writes one batch per cycle: history first, then the current view swap.
#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn SnapshotStore>,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Carry the current view into history, then replace the current view
    /// with `batch`. If carry-forward fails nothing else runs; if the replace
    /// fails the current view is left as it was.
    #[tracing::instrument(skip(self, batch), fields(batch_size = batch.len()))]
    pub async fn ingest(&self, batch: Vec<AircraftSnapshot>) -> Result<IngestReport, IngestError> {
        let started = Instant::now();
        let received = batch.len();
        let batch = dedupe_batch(batch);
        let duplicates = received - batch.len();
        if duplicates > 0 {
            debug!("Collapsed {} duplicate snapshots", duplicates);
        }

        let carried_forward = self.store.carry_forward().await.map_err(|e| {
            metrics::counter!("ingest.failed_total", "stage" => "history").increment(1);
            IngestError::HistoryAppend(e)
        })?;

        let rows = match self.store.max_bind_params() {
            Some(max_params) => chunk_size(max_params, FIELDS_PER_ROW),
            None => batch.len().max(1),
        };
        let chunks = batch.len().div_ceil(rows);

        let current_rows = self
            .store
            .replace_current(batch, rows)
            .await
            .map_err(|e| {
                metrics::counter!("ingest.failed_total", "stage" => "replace").increment(1);
                IngestError::ReplaceView(e)
            })?;

        metrics::counter!("ingest.cycles_total").increment(1);
        metrics::counter!("ingest.snapshots_total").increment(current_rows as u64);
        metrics::counter!("ingest.duplicates_total").increment(duplicates as u64);
        metrics::gauge!("ingest.current_rows").set(current_rows as f64);
        metrics::histogram!("ingest.duration_ms").record(started.elapsed().as_millis() as f64);

        info!(
            "Ingested {} aircraft ({} carried into history, {} chunks) in {:.2}s",
            current_rows,
            carried_forward,
            chunks,
            started.elapsed().as_secs_f64()
        );

        Ok(IngestReport {
            received,
            duplicates,
            carried_forward,
            current_rows,
            chunks,
        })
    }
}
