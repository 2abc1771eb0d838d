//! Application payloads of binary messages (types 6 and 8, SAAB S07/S09),
//! selected by designated area code (DAC) and function identifier (FI).

use log::debug;
use serde::Serialize;

use super::bits::BitBuf;
use super::AisError;

/// Bits in an IMO met/hydro (DAC 1, FI 11) payload.
const METEO_BITS: usize = 290;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "application", rename_all = "snake_case")]
pub enum ApplicationData {
    /// DAC 1, FI 0.
    FreeText { text: String },
    /// DAC 1, FI 11.
    Meteorological(Box<MeteoHydro>),
}

/// Day of month and UTC time of the observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StationTime {
    pub day:    u8,
    pub hour:   u8,
    pub minute: u8,
}

/// IMO SN.1/Circ.236 meteorological and hydrological report.  Every field
/// is optional: an all-ones value means "not available".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeteoHydro {
    pub latitude:                  Option<f64>,
    pub longitude:                 Option<f64>,
    pub station_time:              Option<StationTime>,
    /// Knots.
    pub average_wind_speed:        Option<u32>,
    pub wind_gust:                 Option<u32>,
    pub wind_direction:            Option<u32>,
    pub wind_gust_direction:       Option<u32>,
    /// Degrees Celsius.
    pub air_temperature:           Option<f64>,
    /// Percent.
    pub relative_humidity:         Option<u32>,
    pub dew_point:                 Option<f64>,
    /// Hectopascal.
    pub air_pressure:              Option<u32>,
    pub air_pressure_tendency:     Option<u32>,
    /// Nautical miles.
    pub horizontal_visibility:     Option<f64>,
    /// Metres.
    pub water_level:               Option<f64>,
    pub water_level_trend:         Option<u32>,
    pub surface_current_speed:     Option<f64>,
    pub surface_current_direction: Option<u32>,
    pub current_speed_2:           Option<f64>,
    pub current_direction_2:       Option<u32>,
    pub current_depth_2:           Option<u32>,
    pub current_speed_3:           Option<f64>,
    pub current_direction_3:       Option<u32>,
    pub current_depth_3:           Option<u32>,
    pub significant_wave_height:   Option<f64>,
    pub wave_period:               Option<u32>,
    pub wave_direction:            Option<u32>,
    pub swell_height:              Option<f64>,
    pub swell_period:              Option<u32>,
    pub swell_direction:           Option<u32>,
    pub sea_state:                 Option<u32>,
    pub water_temperature:         Option<f64>,
    pub precipitation_type:        Option<u32>,
    /// Parts per thousand.
    pub salinity:                  Option<f64>,
    pub ice:                       Option<u32>,
}

/// Decode the application payload that follows the DAC/FI header.
/// Unknown applications, and known ones that do not decode, yield `None`.
pub fn decode(dac: u16, fi: u8, data: &BitBuf) -> Option<ApplicationData> {
    match (dac, fi) {
        (1, 0) => Some(ApplicationData::FreeText { text: data.text(12, data.len()) }),
        (1, 11) => match meteo_hydro(data) {
            Ok(report) => Some(ApplicationData::Meteorological(Box::new(report))),
            Err(e) => {
                debug!("AIS: met/hydro payload not decoded: {e}");
                None
            }
        },
        _ => None,
    }
}

fn meteo_hydro(b: &BitBuf) -> Result<MeteoHydro, AisError> {
    if b.len() < METEO_BITS {
        return Err(AisError::Truncated { needed: METEO_BITS, available: b.len() });
    }
    let tenths = |start, width| -> Result<Option<f64>, AisError> {
        Ok(b.field(start, width)?.map(|v| v as f64 / 10.0))
    };
    let signed_tenths = |start, width| -> Result<Option<f64>, AisError> {
        Ok(b.signed_field(start, width)?.map(|v| v as f64 / 10.0))
    };

    Ok(MeteoHydro {
        latitude:                  b.latitude(0, 24)?,
        longitude:                 b.longitude(24, 25)?,
        station_time:              station_time(b.uint(49, 5)?, b.uint(54, 5)?, b.uint(59, 6)?),
        average_wind_speed:        b.field(65, 7)?,
        wind_gust:                 b.field(72, 7)?,
        wind_direction:            b.field(79, 9)?,
        wind_gust_direction:       b.field(88, 9)?,
        air_temperature:           signed_tenths(97, 11)?,
        relative_humidity:         b.field(108, 7)?,
        dew_point:                 signed_tenths(115, 10)?,
        air_pressure:              b.field(125, 9)?,
        air_pressure_tendency:     b.field(134, 2)?,
        horizontal_visibility:     tenths(136, 8)?,
        water_level:               signed_tenths(144, 9)?,
        water_level_trend:         b.field(153, 2)?,
        surface_current_speed:     tenths(155, 8)?,
        surface_current_direction: b.field(163, 9)?,
        current_speed_2:           tenths(172, 8)?,
        current_direction_2:       b.field(180, 9)?,
        current_depth_2:           b.field(189, 5)?,
        current_speed_3:           tenths(194, 8)?,
        current_direction_3:       b.field(202, 9)?,
        current_depth_3:           b.field(211, 5)?,
        significant_wave_height:   tenths(216, 8)?,
        wave_period:               b.field(224, 6)?,
        wave_direction:            b.field(230, 9)?,
        swell_height:              tenths(239, 8)?,
        swell_period:              b.field(247, 6)?,
        swell_direction:           b.field(253, 9)?,
        sea_state:                 b.field(262, 4)?,
        water_temperature:         signed_tenths(266, 10)?,
        precipitation_type:        b.field(276, 3)?,
        salinity:                  tenths(279, 9)?,
        ice:                       b.field(288, 2)?,
    })
}

/// Day 0, hour 24 and minute 60 are the "not available" values.
fn station_time(day: u32, hour: u32, minute: u32) -> Option<StationTime> {
    if day == 0 || day > 31 || hour > 23 || minute > 59 {
        return None;
    }
    Some(StationTime { day: day as u8, hour: hour as u8, minute: minute as u8 })
}
