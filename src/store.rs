//! Storage seam shared by the ingestion pipeline, the cleanup job and the
//! read API.
//!
//! [`crate::aircraft_repo::PgSnapshotStore`] is the production store;
//! [`crate::memory_store::MemoryStore`] backs tests and local runs.

use thiserror::Error;

use crate::aircraft::{AircraftSnapshot, HistoryPoint};

/// PostgreSQL's ceiling on bind parameters in one statement
pub const POSTGRES_MAX_BIND_PARAMS: usize = 65535;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to get database connection: {0}")]
    Pool(String),
    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("schema mismatch on {table}: {detail}")]
    Schema { table: String, detail: String },
    #[error("database task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Errors that retrying the next cycle cannot fix: bad credentials, a
    /// missing database, or tables that do not match the column layout
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::Schema { .. } => true,
            StoreError::Pool(message) => is_configuration_failure(message),
            StoreError::Query(diesel::result::Error::DatabaseError(_, info)) => {
                is_configuration_failure(info.message())
            }
            _ => false,
        }
    }
}

fn is_configuration_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("password authentication failed")
        || message.contains("permission denied")
        || (message.contains("database") && message.contains("does not exist"))
        || (message.contains("role") && message.contains("does not exist"))
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Upsert every current row into the history trail on `(icao, timestamp)`.
    /// Returns the number of rows written.
    async fn carry_forward(&self) -> StoreResult<usize>;

    /// Replace the whole current view with `batch` in one transaction,
    /// inserting at most `chunk_size` rows per statement. On error the
    /// previous view is left untouched.
    async fn replace_current(
        &self,
        batch: Vec<AircraftSnapshot>,
        chunk_size: usize,
    ) -> StoreResult<usize>;

    /// Delete history rows at or older than `max_days` before the newest one
    async fn prune_history(&self, max_days: i64) -> StoreResult<usize>;

    /// Delete current rows older than `window_seconds` before the newest one
    async fn prune_current(&self, window_seconds: i64) -> StoreResult<usize>;

    async fn current_aircraft(&self) -> StoreResult<Vec<AircraftSnapshot>>;

    /// History trail of one aircraft, oldest first
    async fn history(&self, icao: &str) -> StoreResult<Vec<HistoryPoint>>;

    /// Bind parameter ceiling per statement, if the store has one
    fn max_bind_params(&self) -> Option<usize>;
}
