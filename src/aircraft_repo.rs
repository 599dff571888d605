use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::upsert::excluded;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::{debug, info};

use crate::aircraft::{AircraftSnapshot, HistoryPoint};
use crate::schema::{aircraft_current, aircraft_history};
use crate::store::{POSTGRES_MAX_BIND_PARAMS, SnapshotStore, StoreError, StoreResult};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/");

/// Column order the store reads and writes positionally
pub const CURRENT_COLUMNS: &[&str] = &[
    "icao",
    "callsign",
    "altitude",
    "latitude",
    "longitude",
    "speed",
    "track",
    "vertical_rate",
    "timestamp",
];

pub const HISTORY_COLUMNS: &[&str] = &["icao", "latitude", "longitude", "timestamp"];

const CARRY_FORWARD_SQL: &str = r#"
    INSERT INTO aircraft_history (icao, latitude, longitude, timestamp)
    SELECT icao, latitude, longitude, timestamp FROM aircraft_current
    ON CONFLICT (icao, timestamp) DO UPDATE
    SET latitude = EXCLUDED.latitude, longitude = EXCLUDED.longitude
"#;

const PRUNE_HISTORY_SQL: &str = r#"
    DELETE FROM aircraft_history
    WHERE timestamp <= (SELECT MAX(timestamp) FROM aircraft_history) - make_interval(days => $1)
"#;

const PRUNE_CURRENT_SQL: &str = r#"
    DELETE FROM aircraft_current
    WHERE timestamp < (SELECT MAX(timestamp) FROM aircraft_current) - make_interval(secs => $1)
"#;

/// Build a connection pool for `database_url`
pub fn create_pool(database_url: &str, max_size: u32) -> Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(max_size)
        .build(manager)
        .context("Failed to create database connection pool")
}

/// Apply any migrations not yet recorded in the database
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .context("Failed to get database connection for migrations")?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
        for migration in &applied {
            info!("Applied migration {}", migration);
        }
        Ok(())
    })
    .await?
}

#[derive(QueryableByName)]
struct ColumnName {
    #[diesel(sql_type = diesel::sql_types::Text)]
    column_name: String,
}

/// Check that both tables carry exactly the expected columns in order
pub async fn verify_schema(pool: &PgPool) -> StoreResult<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = get_connection(&pool)?;
        check_columns(&mut conn, "aircraft_current", CURRENT_COLUMNS)?;
        check_columns(&mut conn, "aircraft_history", HISTORY_COLUMNS)?;
        Ok(())
    })
    .await
    .map_err(|e| StoreError::Task(e.to_string()))?
}

fn check_columns(conn: &mut PgConnection, table: &str, expected: &[&str]) -> StoreResult<()> {
    let columns: Vec<String> = diesel::sql_query(
        "SELECT column_name::text AS column_name FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 \
         ORDER BY ordinal_position",
    )
    .bind::<diesel::sql_types::Text, _>(table)
    .load::<ColumnName>(conn)?
    .into_iter()
    .map(|row| row.column_name)
    .collect();

    if columns.is_empty() {
        return Err(StoreError::Schema {
            table: table.to_string(),
            detail: "table does not exist".to_string(),
        });
    }

    if columns != expected {
        return Err(StoreError::Schema {
            table: table.to_string(),
            detail: format!("expected columns {:?}, found {:?}", expected, columns),
        });
    }

    Ok(())
}

fn get_connection(pool: &PgPool) -> StoreResult<PgPooledConnection> {
    pool.get().map_err(|e| StoreError::Pool(e.to_string()))
}

#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run a blocking diesel closure on the blocking pool with a pooled connection
    async fn with_connection<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_connection(&pool)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait::async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn carry_forward(&self) -> StoreResult<usize> {
        self.with_connection(|conn| Ok(diesel::sql_query(CARRY_FORWARD_SQL).execute(conn)?))
            .await
    }

    async fn replace_current(
        &self,
        batch: Vec<AircraftSnapshot>,
        chunk_size: usize,
    ) -> StoreResult<usize> {
        let chunk_size = chunk_size.max(1);
        self.with_connection(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let removed = diesel::delete(aircraft_current::table).execute(conn)?;
                debug!("Cleared {} rows from aircraft_current", removed);

                let mut inserted = 0;
                for chunk in batch.chunks(chunk_size) {
                    inserted += diesel::insert_into(aircraft_current::table)
                        .values(chunk)
                        .on_conflict((aircraft_current::icao, aircraft_current::timestamp))
                        .do_update()
                        .set((
                            aircraft_current::callsign.eq(excluded(aircraft_current::callsign)),
                            aircraft_current::altitude.eq(excluded(aircraft_current::altitude)),
                            aircraft_current::latitude.eq(excluded(aircraft_current::latitude)),
                            aircraft_current::longitude.eq(excluded(aircraft_current::longitude)),
                            aircraft_current::speed.eq(excluded(aircraft_current::speed)),
                            aircraft_current::track.eq(excluded(aircraft_current::track)),
                            aircraft_current::vertical_rate
                                .eq(excluded(aircraft_current::vertical_rate)),
                        ))
                        .execute(conn)?;
                }
                Ok(inserted)
            })
        })
        .await
    }

    async fn prune_history(&self, max_days: i64) -> StoreResult<usize> {
        let days = i32::try_from(max_days).unwrap_or(i32::MAX);
        self.with_connection(move |conn| {
            Ok(diesel::sql_query(PRUNE_HISTORY_SQL)
                .bind::<diesel::sql_types::Integer, _>(days)
                .execute(conn)?)
        })
        .await
    }

    async fn prune_current(&self, window_seconds: i64) -> StoreResult<usize> {
        self.with_connection(move |conn| {
            Ok(diesel::sql_query(PRUNE_CURRENT_SQL)
                .bind::<diesel::sql_types::Double, _>(window_seconds as f64)
                .execute(conn)?)
        })
        .await
    }

    async fn current_aircraft(&self) -> StoreResult<Vec<AircraftSnapshot>> {
        self.with_connection(|conn| {
            Ok(aircraft_current::table
                .select(AircraftSnapshot::as_select())
                .order((aircraft_current::icao, aircraft_current::timestamp))
                .load(conn)?)
        })
        .await
    }

    async fn history(&self, icao: &str) -> StoreResult<Vec<HistoryPoint>> {
        let icao = icao.to_string();
        self.with_connection(move |conn| {
            Ok(aircraft_history::table
                .filter(aircraft_history::icao.eq(icao))
                .select(HistoryPoint::as_select())
                .order(aircraft_history::timestamp.asc())
                .load(conn)?)
        })
        .await
    }

    fn max_bind_params(&self) -> Option<usize> {
        Some(POSTGRES_MAX_BIND_PARAMS)
    }
}
