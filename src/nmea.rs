//! NMEA 0183 position decoding.
//!
//! Only the RMC (recommended minimum) sentence is decoded; it carries
//! everything the navigation engine needs: position, speed, course and UTC.
//! A decode either produces a complete [`GpsFix`] or fails as a whole, so the
//! caller can keep its previous fix untouched.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::framing::Sentence;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NmeaError {
    #[error("unsupported sentence {0}")]
    Unsupported(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("cannot parse {field} from {value:?}")]
    FieldParse { field: &'static str, value: String },
}

/// RMC status field: `A` = data valid, anything else (normally `V`) = warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FixStatus {
    Valid,
    Invalid,
}

/// One decoded RMC fix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsFix {
    /// Signed decimal degrees, south negative.
    pub latitude:  f64,
    /// Signed decimal degrees, west negative.
    pub longitude: f64,
    /// Knots.
    pub speed_over_ground:  f64,
    /// Degrees true, `[0, 360)`.
    pub course_over_ground: f64,
    pub utc:    DateTime<Utc>,
    pub status: FixStatus,
}

impl GpsFix {
    /// Invalid fixes are kept for display but must not drive navigation.
    pub fn is_navigable(&self) -> bool {
        self.status == FixStatus::Valid
    }

    /// `YYYY-MM-DDTHH:MM:SSZ`
    pub fn utc_iso(&self) -> String {
        self.utc.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

/// Talkers whose RMC sentences are accepted.
const TALKERS: &[&str] = &["GP", "GN"];

/// Decode a validated sentence into a fix.
pub fn decode(sentence: &Sentence) -> Result<GpsFix, NmeaError> {
    let f = sentence.fields();
    let address = f[0];
    let supported = address.len() == 5
        && address.get(..2).is_some_and(|t| TALKERS.contains(&t))
        && address.get(2..) == Some("RMC");
    if !supported {
        return Err(NmeaError::Unsupported(address.to_string()));
    }
    parse_rmc(&f)
}

/// `$GPRMC,HHMMSS.ss,A,DDMM.MMMM,N,DDDMM.MMMM,W,sog,cog,DDMMYY,...`
fn parse_rmc(f: &[&str]) -> Result<GpsFix, NmeaError> {
    let field = |idx: usize, name: &'static str| -> Result<&str, NmeaError> {
        match f.get(idx) {
            Some(v) if !v.is_empty() => Ok(*v),
            _ => Err(NmeaError::MissingField(name)),
        }
    };

    let time = field(1, "time")?;
    let status = match field(2, "status")? {
        "A" => FixStatus::Valid,
        _ => FixStatus::Invalid,
    };
    let latitude  = coordinate(field(3, "latitude")?, field(4, "latitude hemisphere")?, 2)?;
    let longitude = coordinate(field(5, "longitude")?, field(6, "longitude hemisphere")?, 3)?;
    let speed  = decimal(field(7, "speed")?, "speed")?;
    let course = decimal(field(8, "course")?, "course")?;
    let date = field(9, "date")?;

    if speed < 0.0 {
        return Err(NmeaError::FieldParse { field: "speed", value: f[7].to_string() });
    }

    Ok(GpsFix {
        latitude,
        longitude,
        speed_over_ground:  speed,
        course_over_ground: course.rem_euclid(360.0),
        utc: utc_timestamp(time, date)?,
        status,
    })
}

/// Convert a fixed-width `DDMM.MMMM` / `DDDMM.MMMM` field plus hemisphere
/// letter into signed decimal degrees.
fn coordinate(raw: &str, hemi: &str, deg_digits: usize) -> Result<f64, NmeaError> {
    let (name, limit, negative) = match (deg_digits, hemi) {
        (2, "N") => ("latitude", 90.0, false),
        (2, "S") => ("latitude", 90.0, true),
        (3, "E") => ("longitude", 180.0, false),
        (3, "W") => ("longitude", 180.0, true),
        (2, _) => return Err(parse_err("latitude hemisphere", hemi)),
        _ => return Err(parse_err("longitude hemisphere", hemi)),
    };
    if raw.len() <= deg_digits || !raw.is_char_boundary(deg_digits) {
        return Err(parse_err(name, raw));
    }
    let degrees: u32 = raw[..deg_digits].parse().map_err(|_| parse_err(name, raw))?;
    let minutes: f64 = raw[deg_digits..].parse().map_err(|_| parse_err(name, raw))?;
    if !(0.0..60.0).contains(&minutes) {
        return Err(parse_err(name, raw));
    }
    let value = degrees as f64 + minutes / 60.0;
    if value > limit {
        return Err(parse_err(name, raw));
    }
    Ok(if negative { -value } else { value })
}

fn decimal(raw: &str, name: &'static str) -> Result<f64, NmeaError> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| parse_err(name, raw))
}

/// Combine `HHMMSS[.ss]` and `DDMMYY` (years 2000-2099).
fn utc_timestamp(time: &str, date: &str) -> Result<DateTime<Utc>, NmeaError> {
    let two = |s: &str, at: usize, name: &'static str| -> Result<u32, NmeaError> {
        s.get(at..at + 2)
            .and_then(|d| d.parse().ok())
            .ok_or_else(|| parse_err(name, s))
    };
    if date.len() != 6 {
        return Err(parse_err("date", date));
    }
    let day   = two(date, 0, "date")?;
    let month = two(date, 2, "date")?;
    let year  = 2000 + two(date, 4, "date")? as i32;
    let hour   = two(time, 0, "time")?;
    let minute = two(time, 2, "time")?;
    let second = two(time, 4, "time")?;

    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| parse_err("date", date))?;
    let time = NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| parse_err("time", time))?;
    Ok(date.and_time(time).and_utc())
}

fn parse_err(field: &'static str, value: &str) -> NmeaError {
    NmeaError::FieldParse { field, value: value.to_string() }
}
