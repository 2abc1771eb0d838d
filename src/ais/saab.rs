//! SAAB TransponderTech `$PAIS` sentences.
//!
//! Fields are comma separated hex numbers rather than an armored bit
//! payload: `$PAIS,<code>,<mmsi>,...`.  Coordinates keep the ITU bit widths
//! (27-bit latitude, 28-bit longitude) and are sign-extended from hex.

use log::debug;

use super::bits::{decode_latitude, decode_longitude, sign_extend, BitBuf};
use super::{
    binary, course_tenths, heading, nonzero, rate_of_turn, speed_tenths, AddressedBinary,
    AddressedText, AisError, AisKind, AisReport, BroadcastBinary, Dimensions, Identification,
    MessageId, NavigationStatus, PositionReport, SarAircraftReport, VesselData, VoyageEta,
};

pub fn decode(f: &[&str]) -> Result<AisReport, AisError> {
    let code = hex(f, 1)?;
    let code = u8::try_from(code).map_err(|_| AisError::InvalidHex(f[1].to_string()))?;
    let mmsi = hex(f, 2)?;

    let kind = match code {
        0x02 => AisKind::Position(position(f)?),
        0x04 => AisKind::AddressedText(AddressedText {
            sequence:         None,
            destination_mmsi: hex(f, 5)?,
            text:             field(f, 4)?.to_string(),
        }),
        0x06 => AisKind::BroadcastText { text: field(f, 4)?.to_string() },
        0x07 => {
            let (dac, fi) = application_id(field(f, 7)?)?;
            let payload = BitBuf::from_hex(field(f, 4)?)?;
            AisKind::AddressedBinary(AddressedBinary {
                sequence:         None,
                destination_mmsi: hex(f, 5)?,
                dac,
                fi,
                application:      binary::decode(dac, fi, &payload),
            })
        }
        0x09 => {
            let (dac, fi) = application_id(field(f, 6)?)?;
            let payload = BitBuf::from_hex(field(f, 4)?)?;
            AisKind::BroadcastBinary(BroadcastBinary {
                dac,
                fi,
                application: binary::decode(dac, fi, &payload),
            })
        }
        0x0D | 0x11 => AisKind::SarAircraft(sar_position(f)?),
        0x0E => AisKind::Identification(Identification {
            name:     text(f, 3)?,
            callsign: text(f, 4)?,
            imo:      nonzero(hex(f, 5)?),
        }),
        0x0F => AisKind::VesselData(vessel_data(f)?),
        _ => AisKind::Undecoded,
    };

    Ok(AisReport { mmsi, message_id: MessageId::Saab(code), kind })
}

/// `S02`: rot, nav status, lat, lon, sog, cog, heading, -, accuracy.
fn position(f: &[&str]) -> Result<PositionReport, AisError> {
    let accuracy = field(f, 11)?;
    let position_accuracy = accuracy
        .parse::<u8>()
        .map_err(|_| AisError::Malformed(format!("position accuracy {accuracy:?}")))?
        != 0;
    Ok(PositionReport {
        nav_status:         legacy_nav_status(field(f, 4)?),
        rate_of_turn:       legacy_rate_of_turn(hex(f, 3)?),
        speed_over_ground:  speed_tenths(hex(f, 7)?),
        position_accuracy,
        longitude:          decode_longitude(sign_extend(hex(f, 6)?, 28), 28),
        latitude:           decode_latitude(sign_extend(hex(f, 5)?, 27), 27),
        course_over_ground: course_tenths(hex(f, 8)?),
        heading:            heading(hex(f, 9)?),
    })
}

/// Legacy status codes remapped onto ITU-R M.1371.  Code 5 has no
/// unambiguous ITU counterpart and is treated as unavailable.
fn legacy_nav_status(code: &str) -> Option<NavigationStatus> {
    match code {
        "1" => Some(NavigationStatus::UnderWayUsingEngine),
        "2" => Some(NavigationStatus::NotUnderCommand),
        "3" => Some(NavigationStatus::RestrictedManoeuvrability),
        "4" => Some(NavigationStatus::AtAnchor),
        other => {
            debug!("AIS: ambiguous legacy navigation status {other:?}");
            None
        }
    }
}

/// Unsigned byte: 0–127 turning right, 129–255 turning left, 128 unavailable.
fn legacy_rate_of_turn(raw: u32) -> Option<i32> {
    if raw > 255 {
        return None;
    }
    rate_of_turn(sign_extend(raw, 8))
}

/// `S0D`/`S11`: lat, lon, sog (whole knots), cog, altitude.
fn sar_position(f: &[&str]) -> Result<SarAircraftReport, AisError> {
    let sog = hex(f, 5)?;
    let altitude = hex(f, 7)?;
    Ok(SarAircraftReport {
        altitude:           (altitude != 4095).then_some(altitude),
        speed_over_ground:  (sog <= 1022).then_some(sog),
        position_accuracy:  None,
        longitude:          decode_longitude(sign_extend(hex(f, 4)?, 28), 28),
        latitude:           decode_latitude(sign_extend(hex(f, 3)?, 27), 27),
        course_over_ground: course_tenths(hex(f, 6)?),
    })
}

/// `S0F`: ship type, draught, antenna word, destination, -, ETA.
fn vessel_data(f: &[&str]) -> Result<VesselData, AisError> {
    // width = bits 0..6 + 6..12, length = 12..21 + 21..30
    let antenna = BitBuf::from_uint(hex(f, 5)? as u64, 30);
    let dimensions = Dimensions {
        width:  antenna.uint(0, 6)? + antenna.uint(6, 6)?,
        length: antenna.uint(12, 9)? + antenna.uint(21, 9)?,
    };
    Ok(VesselData {
        ship_type:   nonzero(hex(f, 3)?).map(|t| t as u8),
        draught:     nonzero(hex(f, 4)?).map(|d| d as f64 / 10.0),
        dimensions,
        destination: text(f, 6)?,
        eta:         eta(field(f, 8)?),
    })
}

/// `MMDDHHMM`; `00000000` and anything unparseable is unavailable.
fn eta(raw: &str) -> Option<VoyageEta> {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let part = |at: usize| raw[at..at + 2].parse::<u32>().ok();
    VoyageEta::new(part(0)?, part(2)?, part(4)?, part(6)?)
}

/// 16-bit hex application id: DAC in the top 10 bits, FI in the low 6.
fn application_id(raw: &str) -> Result<(u16, u8), AisError> {
    let bits = BitBuf::from_hex(raw)?;
    Ok((bits.uint(0, 10)? as u16, bits.uint(10, 6)? as u8))
}

fn field<'a>(f: &[&'a str], idx: usize) -> Result<&'a str, AisError> {
    f.get(idx)
        .copied()
        .ok_or_else(|| AisError::Malformed(format!("$PAIS field {idx} missing")))
}

fn hex(f: &[&str], idx: usize) -> Result<u32, AisError> {
    let raw = field(f, idx)?;
    u32::from_str_radix(raw, 16).map_err(|_| AisError::InvalidHex(raw.to_string()))
}

fn text(f: &[&str], idx: usize) -> Result<String, AisError> {
    Ok(field(f, idx)?.trim_matches(|c| c == '@' || c == ' ').to_string())
}
