//! skytrail - SBS (BaseStation) feed ingestion into PostgreSQL
//!
//! Reads a TCP SBS feed in bounded windows, assembles MSG,1/3/4 triplets into
//! aircraft snapshots, and keeps two tables: a current view replaced
//! atomically every cycle and a history trail pruned on a schedule.

pub mod aircraft;
pub mod aircraft_repo;
pub mod cleanup;
pub mod config;
pub mod geojson;
pub mod ingestion;
pub mod log_format;
pub mod memory_store;
pub mod metrics;
pub mod poll_loop;
pub mod sbs;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod web;

pub use aircraft::{AircraftSnapshot, HistoryPoint};
pub use ingestion::{IngestError, IngestReport, IngestionPipeline};
pub use store::{SnapshotStore, StoreError};
