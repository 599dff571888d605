use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{aircraft_current, aircraft_history};

/// Number of bound parameters one `aircraft_current` row takes in a bulk insert
pub const FIELDS_PER_ROW: usize = 9;

/// One aircraft update assembled from an SBS MSG,1 / MSG,3 / MSG,4 triplet.
///
/// `(icao, timestamp)` is the natural key in both the current view and the
/// history trail.
#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable,
)]
#[diesel(table_name = aircraft_current)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AircraftSnapshot {
    /// 6 character ICAO hex address, e.g. "E80451"
    pub icao: String,
    /// Flight identification, may be blank
    pub callsign: String,
    /// Barometric altitude in feet
    pub altitude: i32,
    pub latitude: f32,
    pub longitude: f32,
    /// Ground speed in knots
    pub speed: i32,
    /// Track in degrees (0-359 nominal)
    pub track: i32,
    /// Vertical rate in feet per minute
    pub vertical_rate: i32,
    /// Second precision, taken from the feed's own date/time fields
    pub timestamp: NaiveDateTime,
}

impl AircraftSnapshot {
    pub fn key(&self) -> (&str, NaiveDateTime) {
        (&self.icao, self.timestamp)
    }

    /// The position this snapshot contributes to the history trail
    pub fn history_point(&self) -> HistoryPoint {
        HistoryPoint {
            icao: self.icao.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            timestamp: self.timestamp,
        }
    }
}

/// A row of the append-only history trail
#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable,
)]
#[diesel(table_name = aircraft_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct HistoryPoint {
    pub icao: String,
    pub latitude: f32,
    pub longitude: f32,
    pub timestamp: NaiveDateTime,
}
