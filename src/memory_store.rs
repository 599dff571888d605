use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, NaiveDateTime};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tokio::sync::{Mutex, Notify, RwLock};

use crate::aircraft::{AircraftSnapshot, FIELDS_PER_ROW, HistoryPoint};
use crate::store::{SnapshotStore, StoreError, StoreResult};

type Key = (String, NaiveDateTime);

#[derive(Debug, Default)]
struct Tables {
    current: BTreeMap<Key, AircraftSnapshot>,
    history: BTreeMap<Key, HistoryPoint>,
}

#[derive(Debug, Default)]
struct Faults {
    carry_forward: Option<String>,
    /// Fail while inserting this chunk (1-based) of the next replace
    replace_at_chunk: Option<(usize, String)>,
    /// Hold the next replace open after inserting this chunk
    pause_after_chunk: Option<(usize, ReplacePause)>,
    prune_history: Option<String>,
}

/// Handle to a replace held open between two chunk inserts
#[derive(Debug, Clone, Default)]
pub struct ReplacePause {
    reached: Arc<Notify>,
    resume: Arc<Notify>,
}

impl ReplacePause {
    /// Wait until the replace has stopped at the chosen chunk
    pub async fn paused(&self) {
        self.reached.notified().await;
    }

    pub fn resume(&self) {
        self.resume.notify_one();
    }
}

/// Snapshot store held in process memory.
///
/// Replacing the current view builds the new table off to the side and swaps
/// it in under the write lock, so readers see either the old view or the new
/// one. Failures can be injected to exercise rollback paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    faults: Mutex<Faults>,
    max_bind_params: Option<usize>,
    insert_statements: AtomicUsize,
}

fn injected(message: String) -> StoreError {
    StoreError::Query(DieselError::DatabaseError(
        DatabaseErrorKind::Unknown,
        Box::new(message),
    ))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects statements with more than `max` bind parameters
    pub fn with_bind_param_limit(max: usize) -> Self {
        Self {
            max_bind_params: Some(max),
            ..Self::default()
        }
    }

    pub async fn seed_current(&self, rows: Vec<AircraftSnapshot>) {
        let mut tables = self.tables.write().await;
        for row in rows {
            tables
                .current
                .insert((row.icao.clone(), row.timestamp), row);
        }
    }

    pub async fn seed_history(&self, rows: Vec<HistoryPoint>) {
        let mut tables = self.tables.write().await;
        for row in rows {
            tables
                .history
                .insert((row.icao.clone(), row.timestamp), row);
        }
    }

    /// Every history row, ordered by `(icao, timestamp)`
    pub async fn all_history(&self) -> Vec<HistoryPoint> {
        self.tables.read().await.history.values().cloned().collect()
    }

    /// Number of insert statements issued by replaces so far
    pub fn insert_statements(&self) -> usize {
        self.insert_statements.load(Ordering::Relaxed)
    }

    pub async fn fail_next_carry_forward(&self, message: impl Into<String>) {
        self.faults.lock().await.carry_forward = Some(message.into());
    }

    pub async fn fail_next_replace_at_chunk(&self, chunk: usize, message: impl Into<String>) {
        self.faults.lock().await.replace_at_chunk = Some((chunk, message.into()));
    }

    /// Hold the next replace after it has inserted `chunk` (1-based) chunks,
    /// until [`ReplacePause::resume`] is called
    pub async fn pause_next_replace_after_chunk(&self, chunk: usize) -> ReplacePause {
        let pause = ReplacePause::default();
        self.faults.lock().await.pause_after_chunk = Some((chunk, pause.clone()));
        pause
    }

    pub async fn fail_next_prune_history(&self, message: impl Into<String>) {
        self.faults.lock().await.prune_history = Some(message.into());
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemoryStore {
    async fn carry_forward(&self) -> StoreResult<usize> {
        if let Some(message) = self.faults.lock().await.carry_forward.take() {
            return Err(injected(message));
        }

        let mut tables = self.tables.write().await;
        let points: Vec<HistoryPoint> = tables
            .current
            .values()
            .map(AircraftSnapshot::history_point)
            .collect();
        let written = points.len();
        for point in points {
            tables
                .history
                .insert((point.icao.clone(), point.timestamp), point);
        }
        Ok(written)
    }

    async fn replace_current(
        &self,
        batch: Vec<AircraftSnapshot>,
        chunk_size: usize,
    ) -> StoreResult<usize> {
        let (fault, pause) = {
            let mut faults = self.faults.lock().await;
            (
                faults.replace_at_chunk.take(),
                faults.pause_after_chunk.take(),
            )
        };

        let mut staged = BTreeMap::new();
        let mut inserted = 0;
        for (index, chunk) in batch.chunks(chunk_size.max(1)).enumerate() {
            if let Some(limit) = self.max_bind_params
                && chunk.len() * FIELDS_PER_ROW > limit
            {
                return Err(StoreError::Query(DieselError::QueryBuilderError(
                    format!(
                        "statement needs {} bind parameters, limit is {}",
                        chunk.len() * FIELDS_PER_ROW,
                        limit
                    )
                    .into(),
                )));
            }
            if let Some((at, message)) = &fault
                && *at == index + 1
            {
                return Err(injected(message.clone()));
            }

            self.insert_statements.fetch_add(1, Ordering::Relaxed);
            for row in chunk {
                staged.insert((row.icao.clone(), row.timestamp), row.clone());
                inserted += 1;
            }

            if let Some((after, pause)) = &pause
                && *after == index + 1
            {
                pause.reached.notify_one();
                pause.resume.notified().await;
            }
        }

        self.tables.write().await.current = staged;
        Ok(inserted)
    }

    async fn prune_history(&self, max_days: i64) -> StoreResult<usize> {
        if let Some(message) = self.faults.lock().await.prune_history.take() {
            return Err(injected(message));
        }

        let mut tables = self.tables.write().await;
        let Some(newest) = tables.history.values().map(|p| p.timestamp).max() else {
            return Ok(0);
        };
        let cutoff = newest - Duration::days(max_days);

        let before = tables.history.len();
        tables.history.retain(|_, point| point.timestamp > cutoff);
        Ok(before - tables.history.len())
    }

    async fn prune_current(&self, window_seconds: i64) -> StoreResult<usize> {
        let mut tables = self.tables.write().await;
        let Some(newest) = tables.current.values().map(|s| s.timestamp).max() else {
            return Ok(0);
        };
        let cutoff = newest - Duration::seconds(window_seconds);

        let before = tables.current.len();
        tables.current.retain(|_, snapshot| snapshot.timestamp >= cutoff);
        Ok(before - tables.current.len())
    }

    async fn current_aircraft(&self) -> StoreResult<Vec<AircraftSnapshot>> {
        Ok(self.tables.read().await.current.values().cloned().collect())
    }

    async fn history(&self, icao: &str) -> StoreResult<Vec<HistoryPoint>> {
        Ok(self
            .tables
            .read()
            .await
            .history
            .values()
            .filter(|point| point.icao == icao)
            .cloned()
            .collect())
    }

    fn max_bind_params(&self) -> Option<usize> {
        self.max_bind_params
    }
}
