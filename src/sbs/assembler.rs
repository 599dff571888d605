//! Grouping of raw SBS lines into MSG,1 / MSG,3 / MSG,4 triplets.
//!
//! Two strategies are available:
//! - [`AssemblyMode::Sequential`] treats every three consecutive lines as one
//!   triplet, in class 1/3/4 order, and never resynchronizes. A short line
//!   drops the triplet it lands in and the next line starts a new one.
//! - [`AssemblyMode::Keyed`] keeps partial triplets per aircraft address and
//!   completes one as soon as all three classes have been seen for that
//!   address. Interleaved aircraft and dropped lines only cost the affected
//!   aircraft, and parts older than the expiry are discarded.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::aircraft::AircraftSnapshot;
use crate::sbs::decoder::{
    DecodeError, MSG1_MIN_FIELDS, MSG3_MIN_FIELDS, MSG4_MIN_FIELDS, decode_triplet,
};
use crate::sbs::parser::{SbsMessageType, parse_header};

/// Evict stale partial triplets every N lines
const EVICTION_INTERVAL: u64 = 1000;

/// How lines are grouped into triplets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AssemblyMode {
    /// Three consecutive lines form a triplet
    Sequential,
    /// Lines are grouped by aircraft address
    #[default]
    Keyed,
}

impl std::fmt::Display for AssemblyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssemblyMode::Sequential => write!(f, "sequential"),
            AssemblyMode::Keyed => write!(f, "keyed"),
        }
    }
}

/// Outcome of feeding one line to an assembler
pub type Assembled = Option<Result<AircraftSnapshot, DecodeError>>;

pub enum TripletAssembler {
    Sequential(SequentialAssembler),
    Keyed(KeyedAssembler),
}

impl TripletAssembler {
    pub fn new(mode: AssemblyMode, partial_expiry: Duration) -> Self {
        match mode {
            AssemblyMode::Sequential => Self::Sequential(SequentialAssembler::default()),
            AssemblyMode::Keyed => Self::Keyed(KeyedAssembler::new(partial_expiry)),
        }
    }

    /// Feed one line; returns a decode result whenever a triplet completes
    pub fn push_line(&mut self, line: &str, now: Instant) -> Assembled {
        match self {
            Self::Sequential(assembler) => assembler.push_line(line),
            Self::Keyed(assembler) => assembler.push_line(line, now),
        }
    }

    /// Number of triplets started but not completed
    pub fn incomplete(&self) -> usize {
        match self {
            Self::Sequential(assembler) => assembler.incomplete(),
            Self::Keyed(assembler) => assembler.incomplete(),
        }
    }
}

/// Slot the sequential assembler expects the next line to fill
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Slot {
    #[default]
    Identification,
    Position,
    Velocity,
}

#[derive(Debug, Default)]
pub struct SequentialAssembler {
    next: Slot,
    ident: String,
    position: String,
}

impl SequentialAssembler {
    pub fn push_line(&mut self, line: &str) -> Assembled {
        let field_count = line.split(',').count();

        match self.next {
            Slot::Identification => {
                if field_count >= MSG1_MIN_FIELDS {
                    self.ident = line.to_string();
                    self.next = Slot::Position;
                }
                None
            }
            Slot::Position => {
                if field_count >= MSG3_MIN_FIELDS {
                    self.position = line.to_string();
                    self.next = Slot::Velocity;
                } else {
                    trace!("Short position line, dropping triplet");
                    self.next = Slot::Identification;
                }
                None
            }
            Slot::Velocity => {
                self.next = Slot::Identification;
                if field_count < MSG4_MIN_FIELDS {
                    trace!("Short velocity line, dropping triplet");
                    return None;
                }
                Some(decode_triplet(&self.ident, &self.position, line))
            }
        }
    }

    pub fn incomplete(&self) -> usize {
        usize::from(self.next != Slot::Identification)
    }
}

#[derive(Debug, Clone)]
struct Part {
    line: String,
    received_at: Instant,
}

#[derive(Debug, Default)]
struct PartialTriplet {
    ident: Option<Part>,
    position: Option<Part>,
    velocity: Option<Part>,
}

impl PartialTriplet {
    fn drop_stale(&mut self, now: Instant, expiry: Duration) {
        for slot in [&mut self.ident, &mut self.position, &mut self.velocity] {
            if slot
                .as_ref()
                .is_some_and(|part| now.saturating_duration_since(part.received_at) > expiry)
            {
                *slot = None;
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.ident.is_none() && self.position.is_none() && self.velocity.is_none()
    }
}

/// Per-aircraft triplet assembly
#[derive(Debug)]
pub struct KeyedAssembler {
    partials: HashMap<String, PartialTriplet>,
    expiry: Duration,
    lines_seen: u64,
}

impl KeyedAssembler {
    pub fn new(expiry: Duration) -> Self {
        Self {
            partials: HashMap::new(),
            expiry,
            lines_seen: 0,
        }
    }

    pub fn push_line(&mut self, line: &str, now: Instant) -> Assembled {
        self.lines_seen += 1;
        if self.lines_seen.is_multiple_of(EVICTION_INTERVAL) {
            self.evict_expired(now);
        }

        let header = parse_header(line)?;
        if !header.message_type.is_triplet_member() {
            return None;
        }

        let part = Part {
            line: line.to_string(),
            received_at: now,
        };

        let entry = self.partials.entry(header.icao.to_string()).or_default();
        entry.drop_stale(now, self.expiry);
        match header.message_type {
            SbsMessageType::EsIdentification => entry.ident = Some(part),
            SbsMessageType::EsAirbornePosition => entry.position = Some(part),
            SbsMessageType::EsAirborneVelocity => entry.velocity = Some(part),
            _ => return None,
        }

        if entry.ident.is_none() || entry.position.is_none() || entry.velocity.is_none() {
            return None;
        }

        let complete = self.partials.remove(header.icao)?;
        match (complete.ident, complete.position, complete.velocity) {
            (Some(ident), Some(position), Some(velocity)) => Some(decode_triplet(
                &ident.line,
                &position.line,
                &velocity.line,
            )),
            _ => None,
        }
    }

    /// Drop parts older than the expiry; returns the number of aircraft removed
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.partials.len();
        let expiry = self.expiry;
        self.partials.retain(|_, partial| {
            partial.drop_stale(now, expiry);
            !partial.is_empty()
        });
        before - self.partials.len()
    }

    pub fn incomplete(&self) -> usize {
        self.partials.len()
    }
}
