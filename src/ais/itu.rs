//! ITU-R M.1371 message tables.
//!
//! Offsets are bit positions within the dearmored payload.  Every table
//! starts with the common header: message type (0, 6), repeat indicator
//! (6, 2), MMSI (8, 30).

use chrono::{NaiveDate, NaiveDateTime};

use super::bits::BitBuf;
use super::{
    binary, course_tenths, heading, nonzero, rate_of_turn, speed_tenths, AddressedBinary,
    AddressedText, AisError, AisKind, AisReport, BaseStationReport, BroadcastBinary,
    ClassBExtended, ClassBPosition, Dimensions, MessageId, NavigationStatus, PositionReport,
    SarAircraftReport, StaticPartB, StaticVoyageData, VoyageEta,
};

/// Largest payload a five-slot message can carry.
const MAX_PAYLOAD_BITS: usize = 1008;

pub fn decode(bits: &BitBuf) -> Result<AisReport, AisError> {
    let message_type = bits.uint(0, 6)? as u8;
    let mmsi = bits.uint(8, 30)?;

    let kind = match message_type {
        1..=3 => AisKind::Position(position_report(bits)?),
        4 => AisKind::BaseStation(base_station(bits)?),
        5 => AisKind::StaticVoyage(static_voyage(bits)?),
        6 => AisKind::AddressedBinary(addressed_binary(bits)?),
        8 => AisKind::BroadcastBinary(broadcast_binary(bits)?),
        9 => AisKind::SarAircraft(sar_aircraft(bits)?),
        12 => AisKind::AddressedText(AddressedText {
            sequence:         Some(bits.uint(38, 2)? as u8),
            destination_mmsi: bits.uint(40, 30)?,
            text:             bits.message_text(72, MAX_PAYLOAD_BITS),
        }),
        14 => AisKind::BroadcastText { text: bits.message_text(40, MAX_PAYLOAD_BITS) },
        18 => AisKind::ClassB(class_b_position(bits)?),
        19 => AisKind::ClassBExtended(class_b_extended(bits)?),
        24 => static_data_report(bits)?,
        _ => AisKind::Undecoded,
    };

    Ok(AisReport { mmsi, message_id: MessageId::Itu(message_type), kind })
}

// ── Class A ───────────────────────────────────────────────────────────────────

fn position_report(b: &BitBuf) -> Result<PositionReport, AisError> {
    Ok(PositionReport {
        nav_status:         NavigationStatus::from_code(b.uint(38, 4)?),
        rate_of_turn:       rate_of_turn(b.int(42, 8)?),
        speed_over_ground:  speed_tenths(b.uint(50, 10)?),
        position_accuracy:  b.flag(60)?,
        longitude:          b.longitude(61, 28)?,
        latitude:           b.latitude(89, 27)?,
        course_over_ground: course_tenths(b.uint(116, 12)?),
        heading:            heading(b.uint(128, 9)?),
    })
}

fn base_station(b: &BitBuf) -> Result<BaseStationReport, AisError> {
    let year = b.uint(38, 14)?;
    let station_time = calendar_instant(
        year,
        b.uint(52, 4)?,
        b.uint(56, 5)?,
        b.uint(61, 5)?,
        b.uint(66, 6)?,
        b.uint(72, 6)?,
    );
    Ok(BaseStationReport {
        station_time,
        position_accuracy: b.flag(78)?,
        longitude:         b.longitude(79, 28)?,
        latitude:          b.latitude(107, 27)?,
    })
}

/// `None` for the "not available" defaults (year 0, month 0, hour 24, ...)
/// and anything else that is not a real instant.
fn calendar_instant(year: u32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Option<NaiveDateTime> {
    if year == 0 {
        return None;
    }
    NaiveDate::from_ymd_opt(year as i32, month, day)?.and_hms_opt(hour, minute, second)
}

fn static_voyage(b: &BitBuf) -> Result<StaticVoyageData, AisError> {
    Ok(StaticVoyageData {
        ais_version: b.uint(38, 2)? as u8,
        imo:         nonzero(b.uint(40, 30)?),
        callsign:    b.text(70, 112),
        name:        b.text(112, 232),
        ship_type:   nonzero(b.uint(232, 8)?).map(|t| t as u8),
        dimensions:  dimensions(b, 240)?,
        eta:         VoyageEta::new(b.uint(274, 4)?, b.uint(278, 5)?, b.uint(283, 5)?, b.uint(288, 6)?),
        draught:     nonzero(b.uint(294, 8)?).map(|d| d as f64 / 10.0),
        destination: b.text(302, 422),
    })
}

/// Bow (9), stern (9), port (6), starboard (6) offsets starting at `start`.
fn dimensions(b: &BitBuf, start: usize) -> Result<Dimensions, AisError> {
    Ok(Dimensions::from_offsets(
        b.uint(start, 9)?,
        b.uint(start + 9, 9)?,
        b.uint(start + 18, 6)?,
        b.uint(start + 24, 6)?,
    ))
}

// ── Binary and SAR ────────────────────────────────────────────────────────────

fn addressed_binary(b: &BitBuf) -> Result<AddressedBinary, AisError> {
    let dac = b.uint(72, 10)? as u16;
    let fi = b.uint(82, 6)? as u8;
    Ok(AddressedBinary {
        sequence:         Some(b.uint(38, 2)? as u8),
        destination_mmsi: b.uint(40, 30)?,
        dac,
        fi,
        application:      binary::decode(dac, fi, &b.slice(88, MAX_PAYLOAD_BITS)),
    })
}

fn broadcast_binary(b: &BitBuf) -> Result<BroadcastBinary, AisError> {
    let dac = b.uint(40, 10)? as u16;
    let fi = b.uint(50, 6)? as u8;
    Ok(BroadcastBinary {
        dac,
        fi,
        application: binary::decode(dac, fi, &b.slice(56, MAX_PAYLOAD_BITS)),
    })
}

fn sar_aircraft(b: &BitBuf) -> Result<SarAircraftReport, AisError> {
    let altitude = b.uint(38, 12)?;
    let sog = b.uint(50, 10)?;
    Ok(SarAircraftReport {
        altitude:           (altitude != 4095).then_some(altitude),
        speed_over_ground:  (sog != 1023).then_some(sog),
        position_accuracy:  Some(b.flag(60)?),
        longitude:          b.longitude(61, 28)?,
        latitude:           b.latitude(89, 27)?,
        course_over_ground: course_tenths(b.uint(116, 12)?),
    })
}

// ── Class B ───────────────────────────────────────────────────────────────────

/// Types 18 and 19 share the layout up to the heading.
fn class_b_position(b: &BitBuf) -> Result<ClassBPosition, AisError> {
    Ok(ClassBPosition {
        speed_over_ground:  speed_tenths(b.uint(46, 10)?),
        position_accuracy:  b.flag(56)?,
        longitude:          b.longitude(57, 28)?,
        latitude:           b.latitude(85, 27)?,
        course_over_ground: course_tenths(b.uint(112, 12)?),
        heading:            heading(b.uint(124, 9)?),
    })
}

fn class_b_extended(b: &BitBuf) -> Result<ClassBExtended, AisError> {
    Ok(ClassBExtended {
        position:   class_b_position(b)?,
        name:       b.text(143, 263),
        ship_type:  nonzero(b.uint(263, 8)?).map(|t| t as u8),
        dimensions: dimensions(b, 271)?,
    })
}

/// Type 24: part 0 carries the name, part 1 the rest.
fn static_data_report(b: &BitBuf) -> Result<AisKind, AisError> {
    Ok(match b.uint(38, 2)? {
        0 => AisKind::StaticPartA { name: b.text(40, 160) },
        1 => AisKind::StaticPartB(StaticPartB {
            ship_type:  nonzero(b.uint(40, 8)?).map(|t| t as u8),
            vendor_id:  b.text(48, 90),
            callsign:   b.text(90, 132),
            dimensions: dimensions(b, 132)?,
        }),
        _ => AisKind::Undecoded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ais::bits::testing::BitWriter;
    use chrono::{Datelike, Timelike};

    fn armored(payload: &str, fill: usize) -> AisReport {
        decode(&BitBuf::from_armored(payload, fill).unwrap()).unwrap()
    }

    fn header(message_type: u64, mmsi: u64) -> BitWriter {
        BitWriter::new().uint(message_type, 6).uint(0, 2).uint(mmsi, 30)
    }

    #[test]
    fn position_with_every_field_unavailable() {
        let report = armored("10FGp`?P?w<tSF0l4Q@>4?wv0`7t", 0);
        assert_eq!(report.mmsi, 23_460_000);
        let AisKind::Position(p) = report.kind else { panic!("{:?}", report.kind) };
        assert_eq!(p.nav_status, None);
        assert_eq!(p.rate_of_turn, None);
        assert_eq!(p.speed_over_ground, None);
        assert_eq!(p.longitude, None);
        assert_eq!(p.latitude, None);
        assert_eq!(p.course_over_ground, None);
        assert_eq!(p.heading, None);
    }

    #[test]
    fn position_vector() {
        let report = armored("181:KU@001wqr4fM5mgKw4FH086u", 0);
        let AisKind::Position(p) = report.kind else { panic!("{:?}", report.kind) };
        assert_eq!(p.nav_status, Some(NavigationStatus::UnderWayUsingEngine));
        assert_eq!(p.rate_of_turn, Some(0));
        assert_eq!(p.speed_over_ground, Some(0.1));
        assert!(p.position_accuracy);
        assert_eq!(p.longitude, Some(-1.330948));
        assert_eq!(p.latitude, Some(50.840635));
        assert_eq!(p.course_over_ground, Some(306.8));
        assert_eq!(p.heading, Some(139));
    }

    #[test]
    fn base_station_time() {
        let report = armored("402=aTiuaNFj=OrrkDM4E`Q0288;", 0);
        assert_eq!(report.mmsi, 2_320_787);
        let AisKind::BaseStation(b) = report.kind else { panic!("{:?}", report.kind) };
        let t = b.station_time.unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2010, 5, 28));
        assert_eq!((t.hour(), t.minute(), t.second()), (22, 50, 13));
        assert_eq!(b.longitude, Some(-1.11001));
        assert_eq!(b.latitude, Some(50.79963));
    }

    #[test]
    fn base_station_without_time() {
        let bits = header(4, 1)
            .uint(0, 14).uint(0, 4).uint(0, 5).uint(24, 5).uint(60, 6).uint(60, 6)
            .uint(0, 1).int(181 * 600_000, 28).int(91 * 600_000, 27)
            .into_bitbuf();
        let AisKind::BaseStation(b) = decode(&bits).unwrap().kind else { panic!() };
        assert_eq!(b.station_time, None);
        assert_eq!(b.latitude, None);
        assert_eq!(b.longitude, None);
    }

    #[test]
    fn class_b_vector() {
        let report = armored("B3P;s:@007vPcA7@dEaD?wP5wP06", 0);
        assert_eq!(report.mmsi, 235_076_393);
        assert_eq!(report.message_id, MessageId::Itu(18));
        let AisKind::ClassB(c) = report.kind else { panic!("{:?}", report.kind) };
        assert_eq!(c.speed_over_ground, Some(0.0));
        assert_eq!(c.longitude, Some(-1.30149));
        assert_eq!(c.latitude, Some(50.756843));
        assert_eq!(c.course_over_ground, Some(134.7));
        assert_eq!(c.heading, None);
    }

    #[test]
    fn unsupported_type_is_undecoded() {
        let report = armored("D02=aTh00000", 0);
        assert_eq!(report.mmsi, 2_320_787);
        assert_eq!(report.message_id, MessageId::Itu(20));
        assert!(!report.decoded());
    }

    #[test]
    fn truncated_numeric_field_fails() {
        let bits = header(1, 1).uint(0, 4).into_bitbuf();
        assert!(matches!(decode(&bits), Err(AisError::Truncated { .. })));
    }

    #[test]
    fn sar_aircraft_sentinels() {
        let bits = header(9, 111_232_511)
            .uint(4095, 12).uint(1023, 10).uint(0, 1)
            .int(-750_000, 28).int(30_300_000, 27).uint(3600, 12)
            .into_bitbuf();
        let AisKind::SarAircraft(s) = decode(&bits).unwrap().kind else { panic!() };
        assert_eq!(s.altitude, None);
        assert_eq!(s.speed_over_ground, None);
        assert_eq!(s.longitude, Some(-1.25));
        assert_eq!(s.latitude, Some(50.5));
        assert_eq!(s.course_over_ground, None);

        let bits = header(9, 111_232_511)
            .uint(300, 12).uint(120, 10).uint(1, 1)
            .int(-750_000, 28).int(30_300_000, 27).uint(900, 12)
            .into_bitbuf();
        let AisKind::SarAircraft(s) = decode(&bits).unwrap().kind else { panic!() };
        assert_eq!(s.altitude, Some(300));
        assert_eq!(s.speed_over_ground, Some(120));
        assert_eq!(s.course_over_ground, Some(90.0));
    }

    #[test]
    fn text_messages() {
        let bits = header(12, 1)
            .uint(2, 2).uint(987_654_321, 30).uint(0, 2)
            .text("HELLO SHIP", 10)
            .into_bitbuf();
        let AisKind::AddressedText(t) = decode(&bits).unwrap().kind else { panic!() };
        assert_eq!(t.sequence, Some(2));
        assert_eq!(t.destination_mmsi, 987_654_321);
        assert_eq!(t.text, "HELLO SHIP");

        let bits = header(14, 1).uint(0, 2).text("SAFETY", 8).into_bitbuf();
        let kind = decode(&bits).unwrap().kind;
        assert_eq!(kind, AisKind::BroadcastText { text: "SAFETY".into() });
    }

    #[test]
    fn class_b_extended_report() {
        let bits = header(19, 3)
            .uint(0, 8).uint(55, 10).uint(0, 1)
            .int(-750_000, 28).int(30_300_000, 27).uint(1800, 12).uint(180, 9)
            .uint(0, 6).uint(0, 4)
            .text("SEA BREEZE", 20)
            .uint(37, 8).uint(8, 9).uint(4, 9).uint(2, 6).uint(2, 6)
            .uint(0, 4).uint(0, 1).uint(0, 1).uint(0, 1).uint(0, 4)
            .into_bitbuf();
        let AisKind::ClassBExtended(c) = decode(&bits).unwrap().kind else { panic!() };
        assert_eq!(c.position.speed_over_ground, Some(5.5));
        assert_eq!(c.position.heading, Some(180));
        assert_eq!(c.name, "SEA BREEZE");
        assert_eq!(c.ship_type, Some(37));
        assert_eq!(c.dimensions, Dimensions { length: 12, width: 4 });
    }

    #[test]
    fn static_data_parts() {
        let bits = header(24, 5).uint(0, 2).text("LITTLE BOAT", 20).into_bitbuf();
        let kind = decode(&bits).unwrap().kind;
        assert_eq!(kind, AisKind::StaticPartA { name: "LITTLE BOAT".into() });

        let bits = header(24, 5)
            .uint(1, 2).uint(36, 8).text("ACME01", 7).text("MX123", 7)
            .uint(5, 9).uint(3, 9).uint(1, 6).uint(2, 6).uint(0, 6)
            .into_bitbuf();
        let AisKind::StaticPartB(p) = decode(&bits).unwrap().kind else { panic!() };
        assert_eq!(p.ship_type, Some(36));
        assert_eq!(p.vendor_id, "ACME01");
        assert_eq!(p.callsign, "MX123");
        assert_eq!(p.dimensions, Dimensions { length: 8, width: 3 });

        let bits = header(24, 5).uint(2, 2).uint(0, 160).into_bitbuf();
        assert!(!decode(&bits).unwrap().decoded());
    }

    #[test]
    fn static_voyage_tolerates_short_destination() {
        let bits = header(5, 7)
            .uint(1, 2).uint(0, 30).text("AB12", 7).text("SHORT", 20).uint(0, 8)
            .uint(10, 9).uint(10, 9).uint(3, 6).uint(3, 6).uint(0, 4)
            .uint(6, 4).uint(14, 5).uint(9, 5).uint(30, 6).uint(42, 8)
            .text("ROTTERDAM", 9)
            .into_bitbuf();
        let AisKind::StaticVoyage(v) = decode(&bits).unwrap().kind else { panic!() };
        assert_eq!(v.ais_version, 1);
        assert_eq!(v.imo, None);
        assert_eq!(v.ship_type, None);
        assert_eq!(v.callsign, "AB12");
        assert_eq!(v.name, "SHORT");
        assert_eq!(v.eta, VoyageEta::new(6, 14, 9, 30));
        assert_eq!(v.eta.unwrap().to_string(), "06140930");
        assert_eq!(v.draught, Some(4.2));
        assert_eq!(v.destination, "ROTTERDAM");
    }

    #[test]
    fn broadcast_binary_free_text() {
        let bits = header(8, 9)
            .uint(0, 2).uint(1, 10).uint(0, 6)
            .uint(0, 12).text("TEST MSG", 8)
            .into_bitbuf();
        let AisKind::BroadcastBinary(b) = decode(&bits).unwrap().kind else { panic!() };
        assert_eq!((b.dac, b.fi), (1, 0));
        assert_eq!(b.application, Some(binary::ApplicationData::FreeText { text: "TEST MSG".into() }));
    }

    #[test]
    fn addressed_binary_unknown_application() {
        let bits = header(6, 9)
            .uint(1, 2).uint(366_000_001, 30).uint(0, 1).uint(0, 1)
            .uint(235, 10).uint(10, 6).uint(0xABCD, 16)
            .into_bitbuf();
        let AisKind::AddressedBinary(b) = decode(&bits).unwrap().kind else { panic!() };
        assert_eq!(b.sequence, Some(1));
        assert_eq!(b.destination_mmsi, 366_000_001);
        assert_eq!((b.dac, b.fi), (235, 10));
        assert_eq!(b.application, None);
    }
}
