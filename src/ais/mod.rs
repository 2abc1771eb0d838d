//! AIS decoding: standard `!AIVDM`/`!AIVDO` sentences and the proprietary
//! SAAB TransponderTech `$PAIS` dialect.
//!
//! Every decoded message becomes one [`AisReport`]: the common header
//! (MMSI and message id) plus a typed [`AisKind`] body.  Fields a
//! transmitter marks "not available" decode to `None`, never to the
//! sentinel value.

pub mod binary;
pub mod bits;
pub mod itu;
pub mod multipart;
pub mod saab;

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::framing::Sentence;
use binary::ApplicationData;
use bits::BitBuf;
use multipart::{FragmentKey, MultipartBuffer};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AisError {
    #[error("malformed AIS sentence: {0}")]
    Malformed(String),

    #[error("payload truncated: need {needed} bits, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("invalid hex field {0:?}")]
    InvalidHex(String),

    #[error("invalid armor character {0:?}")]
    InvalidArmor(char),
}

// ── Report types ──────────────────────────────────────────────────────────────

/// Message identifier: ITU-R M.1371 type number or SAAB code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageId {
    Itu(u8),
    Saab(u8),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Itu(n) => write!(f, "{n}"),
            MessageId::Saab(n) => write!(f, "S{n:02X}"),
        }
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// ITU-R M.1371 navigational status, codes 0–14.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationStatus {
    UnderWayUsingEngine,
    AtAnchor,
    NotUnderCommand,
    RestrictedManoeuvrability,
    ConstrainedByDraught,
    Moored,
    Aground,
    EngagedInFishing,
    UnderWaySailing,
    Reserved(u8),
    AisSartActive,
}

impl NavigationStatus {
    /// `None` for 15 ("not defined") and anything out of range.
    pub fn from_code(code: u32) -> Option<Self> {
        use NavigationStatus::*;
        Some(match code {
            0 => UnderWayUsingEngine,
            1 => AtAnchor,
            2 => NotUnderCommand,
            3 => RestrictedManoeuvrability,
            4 => ConstrainedByDraught,
            5 => Moored,
            6 => Aground,
            7 => EngagedInFishing,
            8 => UnderWaySailing,
            9..=13 => Reserved(code as u8),
            14 => AisSartActive,
            _ => return None,
        })
    }
}

/// Overall size from the four antenna offsets, metres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub length: u32,
    pub width:  u32,
}

impl Dimensions {
    pub fn from_offsets(bow: u32, stern: u32, port: u32, starboard: u32) -> Self {
        Self { length: bow + stern, width: port + starboard }
    }
}

/// Estimated time of arrival as transmitted: no year, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoyageEta {
    pub month:  u8,
    pub day:    u8,
    pub hour:   u8,
    pub minute: u8,
}

impl VoyageEta {
    /// Month 0 or day 0 means no ETA was given.
    pub fn new(month: u32, day: u32, hour: u32, minute: u32) -> Option<Self> {
        if month == 0 || month > 12 || day == 0 || day > 31 {
            return None;
        }
        Some(Self { month: month as u8, day: day as u8, hour: hour as u8, minute: minute as u8 })
    }
}

impl fmt::Display for VoyageEta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}{:02}{:02}", self.month, self.day, self.hour, self.minute)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionReport {
    pub nav_status:         Option<NavigationStatus>,
    /// Degrees per minute, positive to starboard.
    pub rate_of_turn:       Option<i32>,
    /// Knots.
    pub speed_over_ground:  Option<f64>,
    pub position_accuracy:  bool,
    pub longitude:          Option<f64>,
    pub latitude:           Option<f64>,
    pub course_over_ground: Option<f64>,
    pub heading:            Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseStationReport {
    pub station_time:      Option<NaiveDateTime>,
    pub position_accuracy: bool,
    pub longitude:         Option<f64>,
    pub latitude:          Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaticVoyageData {
    pub ais_version: u8,
    pub imo:         Option<u32>,
    pub callsign:    String,
    pub name:        String,
    pub ship_type:   Option<u8>,
    pub dimensions:  Dimensions,
    pub eta:         Option<VoyageEta>,
    /// Metres.
    pub draught:     Option<f64>,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressedBinary {
    pub sequence:         Option<u8>,
    pub destination_mmsi: u32,
    pub dac:              u16,
    pub fi:               u8,
    pub application:      Option<ApplicationData>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastBinary {
    pub dac:         u16,
    pub fi:          u8,
    pub application: Option<ApplicationData>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SarAircraftReport {
    /// Metres.
    pub altitude:           Option<u32>,
    /// Whole knots.
    pub speed_over_ground:  Option<u32>,
    pub position_accuracy:  Option<bool>,
    pub longitude:          Option<f64>,
    pub latitude:           Option<f64>,
    pub course_over_ground: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressedText {
    pub sequence:         Option<u8>,
    pub destination_mmsi: u32,
    pub text:             String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassBPosition {
    pub speed_over_ground:  Option<f64>,
    pub position_accuracy:  bool,
    pub longitude:          Option<f64>,
    pub latitude:           Option<f64>,
    pub course_over_ground: Option<f64>,
    pub heading:            Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassBExtended {
    #[serde(flatten)]
    pub position:   ClassBPosition,
    pub name:       String,
    pub ship_type:  Option<u8>,
    pub dimensions: Dimensions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaticPartB {
    pub ship_type:  Option<u8>,
    pub vendor_id:  String,
    pub callsign:   String,
    pub dimensions: Dimensions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identification {
    pub name:     String,
    pub callsign: String,
    pub imo:      Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VesselData {
    pub ship_type:   Option<u8>,
    pub draught:     Option<f64>,
    pub dimensions:  Dimensions,
    pub destination: String,
    pub eta:         Option<VoyageEta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AisKind {
    Position(PositionReport),
    BaseStation(BaseStationReport),
    StaticVoyage(StaticVoyageData),
    AddressedBinary(AddressedBinary),
    BroadcastBinary(BroadcastBinary),
    SarAircraft(SarAircraftReport),
    AddressedText(AddressedText),
    BroadcastText { text: String },
    ClassB(ClassBPosition),
    ClassBExtended(ClassBExtended),
    StaticPartA { name: String },
    StaticPartB(StaticPartB),
    Identification(Identification),
    VesselData(VesselData),
    Undecoded,
}

/// One decoded AIS message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AisReport {
    pub mmsi:       u32,
    pub message_id: MessageId,
    pub kind:       AisKind,
}

impl AisReport {
    /// False for message types outside the supported tables.
    pub fn decoded(&self) -> bool {
        !matches!(self.kind, AisKind::Undecoded)
    }

    /// `(latitude, longitude)` when the message carries a usable position.
    pub fn position(&self) -> Option<(f64, f64)> {
        let (lat, lon) = match &self.kind {
            AisKind::Position(p) => (p.latitude, p.longitude),
            AisKind::BaseStation(b) => (b.latitude, b.longitude),
            AisKind::SarAircraft(s) => (s.latitude, s.longitude),
            AisKind::ClassB(c) => (c.latitude, c.longitude),
            AisKind::ClassBExtended(c) => (c.position.latitude, c.position.longitude),
            _ => return None,
        };
        lat.zip(lon)
    }
}

// ── Field conversions shared by both dialects ─────────────────────────────────

/// Signed ROTais (−127..=127) to degrees per minute; −128 is "not available".
fn rate_of_turn(raw: i32) -> Option<i32> {
    if raw == -128 || !(-127..=127).contains(&raw) {
        return None;
    }
    let magnitude = ((raw.abs() as f64 / 4.733).powi(2) as i32).min(720);
    Some(if raw < 0 { -magnitude } else { magnitude })
}

/// Tenths of a knot; 1023 is "not available".
fn speed_tenths(raw: u32) -> Option<f64> {
    (raw < 1023).then(|| raw as f64 / 10.0)
}

/// Tenths of a degree; 3600 and above are "not available".
fn course_tenths(raw: u32) -> Option<f64> {
    (raw < 3600).then(|| raw as f64 / 10.0)
}

/// Whole degrees; 511 (or anything past 359) is "not available".
fn heading(raw: u32) -> Option<u32> {
    (raw <= 359).then_some(raw)
}

fn nonzero(raw: u32) -> Option<u32> {
    (raw != 0).then_some(raw)
}

// ── Stateful decoder ──────────────────────────────────────────────────────────

/// Decoder for the AIS sentence stream; keeps multipart state between calls.
#[derive(Debug, Default)]
pub struct AisDecoder {
    multipart: MultipartBuffer,
}

impl AisDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one validated sentence.  `Ok(None)` means the sentence was a
    /// fragment of a group that is not complete yet.
    pub fn decode(&mut self, sentence: &Sentence) -> Result<Option<AisReport>, AisError> {
        let fields = sentence.fields();
        match (sentence.sentinel(), fields[0]) {
            ('!', "AIVDM" | "AIVDO") => self.decode_vdm(&fields),
            ('$', "PAIS") => saab::decode(&fields).map(Some),
            (_, other) => Err(AisError::Malformed(format!("not an AIS sentence: {other}"))),
        }
    }

    /// `!AIVDM,<total>,<index>,<seq>,<channel>,<payload>,<fill>`
    fn decode_vdm(&mut self, f: &[&str]) -> Result<Option<AisReport>, AisError> {
        if f.len() < 7 {
            return Err(AisError::Malformed(format!("{} fields, need 7", f.len())));
        }
        let number = |idx: usize, name: &str| -> Result<u8, AisError> {
            f[idx]
                .parse::<u8>()
                .map_err(|_| AisError::Malformed(format!("{name} {:?}", f[idx])))
        };
        let total = number(1, "fragment count")?;
        let index = number(2, "fragment number")?;
        let fill_bits = if f[6].is_empty() { 0 } else { number(6, "fill bits")? as usize };
        if total == 0 || index == 0 || index > total || fill_bits > 5 {
            return Err(AisError::Malformed(format!("fragment {index}/{total} fill {fill_bits}")));
        }

        let (payload, fill_bits) = if total == 1 {
            (f[5].to_string(), fill_bits)
        } else {
            let key = FragmentKey {
                total,
                sequence: f[3].to_string(),
                channel:  f[4].to_string(),
            };
            match self.multipart.push(key, index, f[5], fill_bits) {
                Some(done) => done,
                None => return Ok(None),
            }
        };

        let bits = BitBuf::from_armored(&payload, fill_bits)?;
        itu::decode(&bits).map(Some)
    }

    pub fn has_pending_fragments(&self) -> bool {
        self.multipart.is_pending()
    }
}
