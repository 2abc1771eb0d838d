//! Great-circle geometry and display units.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::NavError;

/// Equatorial radius, km.
pub const EARTH_RADIUS_KM: f64 = 6378.137;

pub const KM_PER_NAUTICAL_MILE: f64 = 1.852;
const MILES_PER_KM: f64 = 0.621371;
const MPH_PER_KNOT: f64 = 1.150779;

/// Distance and initial bearing between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Leg {
    /// Kilometres, rounded to 0.01.
    pub distance_km: f64,
    /// Degrees true, rounded to whole degrees, `[0, 360)`.
    pub bearing:     f64,
}

/// Haversine distance and initial bearing from `(lat1, lon1)` to `(lat2, lon2)`.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Leg {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = phi2 - phi1;
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();
    let distance = EARTH_RADIUS_KM * c;

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    let bearing = (y.atan2(x).to_degrees() + 360.0) % 360.0;

    Leg {
        distance_km: (distance * 100.0).round() / 100.0,
        bearing:     bearing.round() % 360.0,
    }
}

// ── Units ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceUnit {
    Kilometers,
    Miles,
    #[default]
    NauticalMiles,
}

impl DistanceUnit {
    pub fn from_km(self, km: f64) -> f64 {
        match self {
            DistanceUnit::Kilometers => km,
            DistanceUnit::Miles => km * MILES_PER_KM,
            DistanceUnit::NauticalMiles => km / KM_PER_NAUTICAL_MILE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DistanceUnit::Kilometers => "km",
            DistanceUnit::Miles => "mi",
            DistanceUnit::NauticalMiles => "nm",
        }
    }
}

impl FromStr for DistanceUnit {
    type Err = NavError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "km" => Ok(DistanceUnit::Kilometers),
            "mi" => Ok(DistanceUnit::Miles),
            "nm" => Ok(DistanceUnit::NauticalMiles),
            other => Err(NavError::Config(format!("unknown distance unit {other:?}"))),
        }
    }
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeedUnit {
    Kph,
    Mph,
    #[default]
    Knots,
}

impl SpeedUnit {
    pub fn from_knots(self, knots: f64) -> f64 {
        match self {
            SpeedUnit::Kph => knots * KM_PER_NAUTICAL_MILE,
            SpeedUnit::Mph => knots * MPH_PER_KNOT,
            SpeedUnit::Knots => knots,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpeedUnit::Kph => "kph",
            SpeedUnit::Mph => "mph",
            SpeedUnit::Knots => "kn",
        }
    }
}

impl FromStr for SpeedUnit {
    type Err = NavError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kph" => Ok(SpeedUnit::Kph),
            "mph" => Ok(SpeedUnit::Mph),
            "kn" => Ok(SpeedUnit::Knots),
            other => Err(NavError::Config(format!("unknown speed unit {other:?}"))),
        }
    }
}

impl fmt::Display for SpeedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
