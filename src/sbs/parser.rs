/// SBS message types (MSG,1 through MSG,8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SbsMessageType {
    /// MSG,1: ES Identification and Category (callsign)
    EsIdentification = 1,
    /// MSG,2: ES Surface Position Message (surface position)
    EsSurfacePosition = 2,
    /// MSG,3: ES Airborne Position Message (altitude, lat/lon)
    EsAirbornePosition = 3,
    /// MSG,4: ES Airborne Velocity Message (speed, track, vertical rate)
    EsAirborneVelocity = 4,
    /// MSG,5: Surveillance Alt Message (altitude only)
    SurveillanceAlt = 5,
    /// MSG,6: Surveillance ID Message (squawk)
    SurveillanceId = 6,
    /// MSG,7: Air To Air Message (altitude)
    AirToAir = 7,
    /// MSG,8: All Call Reply (no data)
    AllCallReply = 8,
}

impl SbsMessageType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::EsIdentification),
            2 => Some(Self::EsSurfacePosition),
            3 => Some(Self::EsAirbornePosition),
            4 => Some(Self::EsAirborneVelocity),
            5 => Some(Self::SurveillanceAlt),
            6 => Some(Self::SurveillanceId),
            7 => Some(Self::AirToAir),
            8 => Some(Self::AllCallReply),
            _ => None,
        }
    }

    /// Whether this class is one of the three that make up a snapshot triplet
    pub fn is_triplet_member(&self) -> bool {
        matches!(
            self,
            Self::EsIdentification | Self::EsAirbornePosition | Self::EsAirborneVelocity
        )
    }
}

/// The routing part of an SBS line: message class and aircraft address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbsHeader<'a> {
    pub message_type: SbsMessageType,
    pub icao: &'a str,
}

/// Read the message class and aircraft id of an SBS line.
///
/// Returns `None` for anything that is not a `MSG` line with a known class and
/// a non-empty aircraft id. Field contents beyond the header are left to the
/// triplet decoder.
pub fn parse_header(line: &str) -> Option<SbsHeader<'_>> {
    let mut fields = line.trim().split(',');

    if fields.next()? != "MSG" {
        return None;
    }

    let message_type = fields
        .next()?
        .trim()
        .parse::<u8>()
        .ok()
        .and_then(SbsMessageType::from_u8)?;

    // Fields 2 and 3: transmission type, session id
    let icao = fields.nth(2)?.trim();
    if icao.is_empty() {
        return None;
    }

    Some(SbsHeader { message_type, icao })
}
