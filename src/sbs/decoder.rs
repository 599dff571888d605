//! Decoding of one MSG,1 / MSG,3 / MSG,4 triplet into an [`AircraftSnapshot`].
//!
//! SBS format: MSG,<type>,<transmission_type>,<session_id>,<aircraft_id>,<flight_id>,
//!             <date_gen>,<time_gen>,<date_log>,<time_log>,<callsign>,<altitude>,
//!             <ground_speed>,<track>,<latitude>,<longitude>,<vertical_rate>,<squawk>,
//!             <alert>,<emergency>,<spi>,<on_ground>
//!
//! The identification message carries the aircraft address, the logged date/time
//! and the callsign; the airborne position message carries altitude and lat/lon;
//! the airborne velocity message carries speed, track and vertical rate.

use chrono::{NaiveDateTime, Timelike};
use thiserror::Error;

use crate::aircraft::AircraftSnapshot;

/// Minimum field count of an identification (MSG,1) line
pub const MSG1_MIN_FIELDS: usize = 11;
/// Minimum field count of an airborne position (MSG,3) line
pub const MSG3_MIN_FIELDS: usize = 16;
/// Minimum field count of an airborne velocity (MSG,4) line
pub const MSG4_MIN_FIELDS: usize = 17;

const ICAO_LEN: usize = 6;
const CALLSIGN_MAX_LEN: usize = 10;

// Field positions
const ICAO: usize = 4;
const DATE: usize = 8;
const TIME: usize = 9;
const CALLSIGN: usize = 10;
const ALTITUDE: usize = 11;
const SPEED: usize = 12;
const TRACK: usize = 13;
const LATITUDE: usize = 14;
const LONGITUDE: usize = 15;
const VERTICAL_RATE: usize = 16;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Why a triplet could not be turned into a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("MSG,{class} has {actual} fields, expected at least {expected}")]
    TooFewFields {
        class: u8,
        expected: usize,
        actual: usize,
    },

    #[error("{field} is not a number: '{value}'")]
    BadNumber { field: &'static str, value: String },

    #[error("invalid timestamp '{value}'")]
    BadTimestamp { value: String },

    #[error("invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },
}

impl DecodeError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::TooFewFields { .. } => "too_few_fields",
            DecodeError::BadNumber { .. } => "bad_number",
            DecodeError::BadTimestamp { .. } => "bad_timestamp",
            DecodeError::InvalidField { .. } => "invalid_field",
        }
    }
}

/// Split an SBS line into its comma separated fields
pub fn split_fields(line: &str) -> Vec<&str> {
    line.trim_end_matches(['\r', '\n']).split(',').collect()
}

/// Check that `fields` is long enough to be a MSG,`class` line
pub fn require_fields(fields: &[&str], class: u8, expected: usize) -> Result<(), DecodeError> {
    if fields.len() < expected {
        return Err(DecodeError::TooFewFields {
            class,
            expected,
            actual: fields.len(),
        });
    }
    Ok(())
}

/// Decode an identification / position / velocity triplet.
///
/// Any line with too few fields or any unparseable numeric field invalidates
/// the whole triplet; no partially filled snapshot is ever produced.
pub fn decode_triplet(
    msg1: &str,
    msg3: &str,
    msg4: &str,
) -> Result<AircraftSnapshot, DecodeError> {
    let ident = split_fields(msg1);
    let position = split_fields(msg3);
    let velocity = split_fields(msg4);

    require_fields(&ident, 1, MSG1_MIN_FIELDS)?;
    require_fields(&position, 3, MSG3_MIN_FIELDS)?;
    require_fields(&velocity, 4, MSG4_MIN_FIELDS)?;

    decode_fields(&ident, &position, &velocity)
}

/// Decode already split lines. Field counts must have been checked with
/// [`require_fields`]; short slices are rejected again here rather than indexed.
pub fn decode_fields(
    ident: &[&str],
    position: &[&str],
    velocity: &[&str],
) -> Result<AircraftSnapshot, DecodeError> {
    require_fields(ident, 1, MSG1_MIN_FIELDS)?;
    require_fields(position, 3, MSG3_MIN_FIELDS)?;
    require_fields(velocity, 4, MSG4_MIN_FIELDS)?;

    let icao = ident[ICAO].trim();
    if icao.chars().count() != ICAO_LEN {
        return Err(DecodeError::InvalidField {
            field: "icao",
            value: icao.to_string(),
        });
    }

    let callsign = ident[CALLSIGN].trim();
    if callsign.chars().count() > CALLSIGN_MAX_LEN {
        return Err(DecodeError::InvalidField {
            field: "callsign",
            value: callsign.to_string(),
        });
    }

    let timestamp = parse_timestamp(ident[DATE], ident[TIME])?;

    let altitude = parse_int("altitude", position[ALTITUDE])?;
    let latitude = parse_float("latitude", position[LATITUDE])?;
    let longitude = parse_float("longitude", position[LONGITUDE])?;

    let speed = parse_float("speed", velocity[SPEED])?;
    let track = parse_float("track", velocity[TRACK])?;
    let vertical_rate = parse_int("vertical_rate", velocity[VERTICAL_RATE])?;

    Ok(AircraftSnapshot {
        icao: icao.to_ascii_uppercase(),
        callsign: callsign.to_string(),
        altitude,
        latitude,
        longitude,
        speed: speed as i32,
        track: track as i32,
        vertical_rate,
        timestamp,
    })
}

/// Build the store timestamp text from the feed's date and time fields.
///
/// Slashes in the date become dashes and a trailing `.000` millisecond suffix
/// is dropped: `"2024/03/29"` + `"11:45:05.000"` gives `"2024-03-29 11:45:05"`.
pub fn make_timestamp(date: &str, time: &str) -> String {
    let date = date.trim().replace('/', "-");
    let time = time.trim();
    let time = time.strip_suffix(".000").unwrap_or(time);
    format!("{date} {time}")
}

/// Parse the feed's date and time fields into a second precision timestamp
pub fn parse_timestamp(date: &str, time: &str) -> Result<NaiveDateTime, DecodeError> {
    let text = make_timestamp(date, time);
    NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT)
        .ok()
        .and_then(|ts| ts.with_nanosecond(0))
        .ok_or(DecodeError::BadTimestamp { value: text })
}

fn parse_int(field: &'static str, value: &str) -> Result<i32, DecodeError> {
    value.trim().parse().map_err(|_| DecodeError::BadNumber {
        field,
        value: value.to_string(),
    })
}

fn parse_float(field: &'static str, value: &str) -> Result<f32, DecodeError> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DecodeError::BadNumber {
            field,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    const MSG1: &str = "MSG,1,0,0,E80451,0,2024/03/29,11:45:05.000,2024/03/29,11:45:05.000,TAM8112,,,,,,,,,,,";
    const MSG3: &str = "MSG,3,0,0,E80451,0,2024/03/29,11:45:05.000,2024/03/29,11:45:05.000,,9725,,,19.329620,-99.196991,,,,,,";
    const MSG4: &str = "MSG,4,0,0,E80451,0,2024/03/29,11:45:05.000,2024/03/29,11:45:05.000,,,184.317657,334.964325,,,-960,,,,,";

    #[test]
    fn test_decode_well_formed_triplet() {
        let snapshot = decode_triplet(MSG1, MSG3, MSG4).unwrap();

        assert_eq!(snapshot.icao, "E80451");
        assert_eq!(snapshot.callsign, "TAM8112");
        assert_eq!(snapshot.altitude, 9725);
        assert!((snapshot.latitude - 19.329_62).abs() < 0.0001);
        assert!((snapshot.longitude - (-99.196_991)).abs() < 0.0001);
        assert_eq!(snapshot.speed, 184);
        assert_eq!(snapshot.track, 334);
        assert_eq!(snapshot.vertical_rate, -960);
        assert_eq!(
            snapshot.timestamp,
            NaiveDate::from_ymd_opt(2024, 3, 29)
                .unwrap()
                .and_hms_opt(11, 45, 5)
                .unwrap()
        );
    }

    #[test]
    fn test_make_timestamp() {
        assert_eq!(
            make_timestamp("2024/03/29", "11:45:05.000"),
            "2024-03-29 11:45:05"
        );
        // Only the .000 suffix is stripped
        assert_eq!(
            make_timestamp("2024/03/29", "11:45:05.250"),
            "2024-03-29 11:45:05.250"
        );
    }

    #[test]
    fn test_parse_timestamp_truncates_fraction() {
        let ts = parse_timestamp("2008/11/28", "23:48:18.611").unwrap();
        assert_eq!(ts.to_string(), "2008-11-28 23:48:18");
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        let err = parse_timestamp("yesterday", "noon").unwrap_err();
        assert_eq!(
            err,
            DecodeError::BadTimestamp {
                value: "yesterday noon".to_string()
            }
        );
    }

    #[test]
    fn test_too_few_fields_per_class() {
        let short1 = "MSG,1,0,0,E80451,0,2024/03/29,11:45:05.000,2024/03/29,11:45:05.000";
        assert_eq!(
            decode_triplet(short1, MSG3, MSG4).unwrap_err(),
            DecodeError::TooFewFields {
                class: 1,
                expected: 11,
                actual: 10
            }
        );

        let short3 = "MSG,3,0,0,E80451,0,2024/03/29,11:45:05.000,2024/03/29,11:45:05.000,,9725,,,19.329620";
        assert!(matches!(
            decode_triplet(MSG1, short3, MSG4),
            Err(DecodeError::TooFewFields { class: 3, .. })
        ));

        let short4 = "MSG,4,0,0,E80451,0,2024/03/29,11:45:05.000,2024/03/29,11:45:05.000,,,184.3,334.9,,";
        assert!(matches!(
            decode_triplet(MSG1, MSG3, short4),
            Err(DecodeError::TooFewFields { class: 4, .. })
        ));
    }

    #[test]
    fn test_bad_number_invalidates_triplet() {
        let bad_alt = MSG3.replace("9725", "high");
        assert_eq!(
            decode_triplet(MSG1, &bad_alt, MSG4).unwrap_err(),
            DecodeError::BadNumber {
                field: "altitude",
                value: "high".to_string()
            }
        );

        // Empty vertical rate is not zero
        let no_vrate = MSG4.replace("-960", "");
        assert!(matches!(
            decode_triplet(MSG1, MSG3, &no_vrate),
            Err(DecodeError::BadNumber {
                field: "vertical_rate",
                ..
            })
        ));

        let nan_lat = MSG3.replace("19.329620", "NaN");
        assert!(matches!(
            decode_triplet(MSG1, &nan_lat, MSG4),
            Err(DecodeError::BadNumber {
                field: "latitude",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_icao_and_callsign() {
        let long_icao = MSG1.replace("E80451", "E804512");
        assert!(matches!(
            decode_triplet(&long_icao, MSG3, MSG4),
            Err(DecodeError::InvalidField { field: "icao", .. })
        ));

        let long_callsign = MSG1.replace("TAM8112", "TAM81120000X");
        assert!(matches!(
            decode_triplet(&long_callsign, MSG3, MSG4),
            Err(DecodeError::InvalidField {
                field: "callsign",
                ..
            })
        ));
    }

    #[test]
    fn test_icao_is_uppercased() {
        let lower = MSG1.replace("E80451", "e80451");
        let snapshot = decode_triplet(&lower, MSG3, MSG4).unwrap();
        assert_eq!(snapshot.icao, "E80451");
    }

    #[test]
    fn test_blank_callsign_is_allowed() {
        let blank = MSG1.replace("TAM8112", "");
        let snapshot = decode_triplet(&blank, MSG3, MSG4).unwrap();
        assert_eq!(snapshot.callsign, "");
    }

    #[test]
    fn test_trailing_carriage_return() {
        let msg4 = format!("{MSG4}\r");
        assert!(decode_triplet(MSG1, MSG3, &msg4).is_ok());
    }

    fn triplet_strategy() -> impl Strategy<Value = (String, String, String)> {
        (
            "[0-9A-F]{6}",
            "[A-Z]{3}[0-9]{1,4}",
            -1000i32..60000,
            -90.0f32..90.0,
            -180.0f32..180.0,
            0.0f32..700.0,
            0.0f32..360.0,
            -6000i32..6000,
            0u32..24,
            0u32..60,
        )
            .prop_map(|(icao, callsign, alt, lat, lon, speed, track, vrate, h, m)| {
                let head = format!("{icao},0,2024/03/29,{h:02}:{m:02}:05.000,2024/03/29,{h:02}:{m:02}:05.000");
                (
                    format!("MSG,1,0,0,{head},{callsign},,,,,,,,,,,"),
                    format!("MSG,3,0,0,{head},,{alt},,,{lat},{lon},,,,,,"),
                    format!("MSG,4,0,0,{head},,,{speed},{track},,,{vrate},,,,,"),
                )
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_decoding_is_deterministic((m1, m3, m4) in triplet_strategy()) {
            let first = decode_triplet(&m1, &m3, &m4).unwrap();
            let second = decode_triplet(&m1, &m3, &m4).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_short_line_never_decodes(
            (m1, m3, m4) in triplet_strategy(),
            which in 0usize..3,
            keep in 0usize..10,
        ) {
            let limits = [MSG1_MIN_FIELDS, MSG3_MIN_FIELDS, MSG4_MIN_FIELDS];
            let mut lines = [m1, m3, m4];
            let fields: Vec<&str> = lines[which].split(',').collect();
            let keep = keep.min(limits[which] - 1);
            lines[which] = fields[..keep.max(1)].join(",");

            let result = decode_triplet(&lines[0], &lines[1], &lines[2]);
            prop_assert!(
                matches!(result, Err(DecodeError::TooFewFields { .. })),
                "expected TooFewFields"
            );
        }
    }
}
