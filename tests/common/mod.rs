//! Common test utilities for integration tests
//!
//! - [`SbsFeed`] is a TCP stub that plays SBS lines to every connection.
//! - [`TestDatabase`] creates a uniquely named PostgreSQL database, applies
//!   migrations, and drops it again on `Drop`.
//!
//! PostgreSQL tests read `TEST_DATABASE_URL` (default
//! `postgresql://localhost/skytrail_test`) and are `#[ignore]`d so they only
//! run with `cargo test -- --ignored` against a live server.

#![allow(dead_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel_migrations::MigrationHarness;
use skytrail::aircraft_repo::{MIGRATIONS, PgPool, create_pool};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

pub const MSG1: &str = "MSG,1,0,0,E80451,0,2024/03/29,11:45:05.000,2024/03/29,11:45:05.000,TAM8112,,,,,,,,,,,";
pub const MSG3: &str = "MSG,3,0,0,E80451,0,2024/03/29,11:45:05.000,2024/03/29,11:45:05.000,,9725,,,19.329620,-99.196991,,,,,,";
pub const MSG4: &str = "MSG,4,0,0,E80451,0,2024/03/29,11:45:05.000,2024/03/29,11:45:05.000,,,184.317657,334.964325,,,-960,,,,,";

/// A MSG,1/3/4 triplet for `icao` at 2024-03-29 11:45:`second`
pub fn triplet(icao: &str, second: u32) -> [String; 3] {
    let ts = format!("2024/03/29,11:45:{second:02}.000,2024/03/29,11:45:{second:02}.000");
    [
        format!("MSG,1,0,0,{icao},0,{ts},TAM8112,,,,,,,,,,,"),
        format!("MSG,3,0,0,{icao},0,{ts},,9725,,,19.329620,-99.196991,,,,,,"),
        format!("MSG,4,0,0,{icao},0,{ts},,,184.317657,334.964325,,,-960,,,,,"),
    ]
}

/// TCP stub that writes the same lines to every client
pub struct SbsFeed {
    pub address: String,
}

impl SbsFeed {
    /// Write `lines` then close the connection
    pub async fn serve(lines: Vec<String>) -> Self {
        Self::start(lines, None).await
    }

    /// Write `lines` then keep the connection open for `hold`
    pub async fn serve_and_hold(lines: Vec<String>, hold: Duration) -> Self {
        Self::start(lines, Some(hold)).await
    }

    async fn start(lines: Vec<String>, hold: Option<Duration>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind SBS stub");
        let address = listener
            .local_addr()
            .expect("SBS stub has no local address")
            .to_string();
        let payload: String = lines.iter().map(|line| format!("{line}\r\n")).collect();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let payload = payload.clone();
                tokio::spawn(async move {
                    if socket.write_all(payload.as_bytes()).await.is_err() {
                        return;
                    }
                    if let Some(hold) = hold {
                        tokio::time::sleep(hold).await;
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { address }
    }

    /// An address nothing is listening on
    pub async fn unreachable() -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind placeholder listener");
        let address = listener
            .local_addr()
            .expect("placeholder listener has no local address")
            .to_string();
        drop(listener);
        address
    }
}

/// An isolated database, dropped when this value is dropped.
///
/// Requires PostgreSQL 13+ for `DROP DATABASE ... WITH (FORCE)`.
pub struct TestDatabase {
    db_name: String,
    pool: PgPool,
    admin_url: String,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        dotenvy::dotenv().ok();

        let base_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/skytrail_test".to_string());
        let (prefix, _) = base_url
            .rsplit_once('/')
            .context("TEST_DATABASE_URL has no database name")?;

        let db_name = format!("skytrail_test_{}", uuid::Uuid::new_v4().simple());
        let admin_url = format!("{}/postgres", prefix);
        let test_db_url = format!("{}/{}", prefix, db_name);

        {
            let admin_url = admin_url.clone();
            let db_name = db_name.clone();
            let test_db_url = test_db_url.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                let mut admin = PgConnection::establish(&admin_url).context(
                    "Failed to connect to PostgreSQL for database creation. Is PostgreSQL running?",
                )?;
                // db_name is generated from a uuid, safe to interpolate
                diesel::sql_query(format!("CREATE DATABASE \"{}\"", db_name))
                    .execute(&mut admin)
                    .with_context(|| format!("Failed to create database {}", db_name))?;

                let mut conn = PgConnection::establish(&test_db_url)
                    .with_context(|| format!("Failed to connect to {}", db_name))?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
                Ok(())
            })
            .await??;
        }

        let pool = create_pool(&test_db_url, 10)?;

        Ok(Self {
            db_name,
            pool,
            admin_url,
        })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn name(&self) -> &str {
        &self.db_name
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let admin_url = self.admin_url.clone();
        let db_name = self.db_name.clone();

        // Drop runs inside the test runtime; do the blocking work on a plain thread
        let handle = std::thread::spawn(move || {
            if let Ok(mut conn) = PgConnection::establish(&admin_url) {
                let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", db_name);
                if let Err(e) = diesel::sql_query(&drop_sql).execute(&mut conn) {
                    eprintln!("Warning: Failed to drop test database {}: {}", db_name, e);
                }
            }
        });
        let _ = handle.join();
    }
}
