//! GeoJSON encodings served by the read API.
//!
//! Current aircraft become a `FeatureCollection` of `Point`s; one aircraft's
//! history becomes a `FeatureCollection` holding a single `LineString`.
//! Coordinates are `[longitude, latitude]` as GeoJSON requires.

use serde::Serialize;
use thiserror::Error;

use crate::aircraft::{AircraftSnapshot, HistoryPoint};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeoJsonError {
    #[error("coordinates array must have at least 2 items, got {0}")]
    TooFewCoordinates(usize),
}

#[derive(Debug, Serialize)]
pub struct FeatureCollection<G, P> {
    #[serde(rename = "type")]
    kind: &'static str,
    pub features: Vec<Feature<G, P>>,
}

impl<G, P> FeatureCollection<G, P> {
    pub fn new(features: Vec<Feature<G, P>>) -> Self {
        Self {
            kind: "FeatureCollection",
            features,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Feature<G, P> {
    #[serde(rename = "type")]
    kind: &'static str,
    pub properties: P,
    pub geometry: G,
}

impl<G, P> Feature<G, P> {
    fn new(geometry: G, properties: P) -> Self {
        Self {
            kind: "Feature",
            properties,
            geometry,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f32; 2] },
    LineString { coordinates: Vec<[f32; 2]> },
}

#[derive(Debug, Serialize)]
pub struct CurrentProperties {
    pub icao: String,
    pub callsign: String,
    pub altitude: i32,
    pub speed: i32,
    pub track: i32,
    pub vspeed: i32,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryProperties {
    pub icao: String,
}

pub type CurrentCollection = FeatureCollection<Geometry, CurrentProperties>;
pub type HistoryCollection = FeatureCollection<Geometry, HistoryProperties>;

pub fn current_to_geojson(aircraft: &[AircraftSnapshot]) -> CurrentCollection {
    let features = aircraft
        .iter()
        .map(|snapshot| {
            Feature::new(
                Geometry::Point {
                    coordinates: [snapshot.longitude, snapshot.latitude],
                },
                CurrentProperties {
                    icao: snapshot.icao.clone(),
                    callsign: snapshot.callsign.clone(),
                    altitude: snapshot.altitude,
                    speed: snapshot.speed,
                    track: snapshot.track,
                    vspeed: snapshot.vertical_rate,
                    timestamp: snapshot.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                },
            )
        })
        .collect();

    FeatureCollection::new(features)
}

/// Encode one aircraft's trail. `points` must all share an icao and be in
/// time order; a line needs at least two of them.
pub fn history_to_geojson(points: &[HistoryPoint]) -> Result<HistoryCollection, GeoJsonError> {
    if points.len() < 2 {
        return Err(GeoJsonError::TooFewCoordinates(points.len()));
    }

    let coordinates = points
        .iter()
        .map(|point| [point.longitude, point.latitude])
        .collect();

    Ok(FeatureCollection::new(vec![Feature::new(
        Geometry::LineString { coordinates },
        HistoryProperties {
            icao: points[0].icao.clone(),
        },
    )]))
}
