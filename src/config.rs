//! navstat configuration file parser.
//!
//! Flat `key = value` lines, `#` comments.  Unknown keys are ignored and
//! unparseable values keep their defaults.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{NavError, Result};
use crate::nav::geo::{DistanceUnit, SpeedUnit};
use crate::serial;

// Defaults
const SERIAL_BAUD:         u32 = 4800;
const SERIAL_TIMEOUT_MS:   u64 = 500;
const RECONNECT_ATTEMPTS:  u32 = 5;
const RECONNECT_DELAY:     u64 = 5;
const TRACK_INTERVAL:      u64 = 10;
const TRACK_BATCH:         usize = 6;
const TRACK_BUFFER_BYTES:  usize = 4096;
const TRACK_MAX_BYTES:     u64 = 1 << 20;
const POSITION_INTERVAL:   u64 = 1;
const ARRIVAL_INTERVAL:    u64 = 4;
const CROSSTRACK_INTERVAL: u64 = 1;
const ARRIVAL_THRESHOLD:   f64 = 0.02;
const XTE_ALARM:           f64 = 0.5;
const STATUS_INTERVAL:     u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct NavConfig {
    // ── Serial ────────────────────────────────────────────────────────────────
    pub serial_dev:         String,
    pub serial_baud:        u32,
    pub serial_timeout_ms:  u64,
    pub reconnect_attempts: u32,
    /// Seconds between reconnect attempts.
    pub reconnect_delay:    u64,
    // ── Display units ─────────────────────────────────────────────────────────
    pub distance_unit: DistanceUnit,
    pub speed_unit:    SpeedUnit,
    // ── Route ─────────────────────────────────────────────────────────────────
    /// GPX route followed from start-up.
    pub route_file:          Option<PathBuf>,
    pub position_interval:   u64,
    pub arrival_interval:    u64,
    pub crosstrack_interval: u64,
    /// Auto-advance proximity, km.
    pub arrival_threshold:   f64,
    /// Cross-track alarm threshold, km.
    pub xte_alarm:           f64,
    // ── Track ─────────────────────────────────────────────────────────────────
    /// Tracking is enabled when set.
    pub track_dir:          Option<PathBuf>,
    pub track_interval:     u64,
    pub track_batch:        usize,
    pub track_buffer_bytes: usize,
    pub track_max_bytes:    u64,
    // ── Process ───────────────────────────────────────────────────────────────
    pub status_interval: u64,
    pub log_syslog:      bool,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            serial_dev:          "/dev/ttyUSB0".to_string(),
            serial_baud:         SERIAL_BAUD,
            serial_timeout_ms:   SERIAL_TIMEOUT_MS,
            reconnect_attempts:  RECONNECT_ATTEMPTS,
            reconnect_delay:     RECONNECT_DELAY,
            distance_unit:       DistanceUnit::NauticalMiles,
            speed_unit:          SpeedUnit::Knots,
            route_file:          None,
            position_interval:   POSITION_INTERVAL,
            arrival_interval:    ARRIVAL_INTERVAL,
            crosstrack_interval: CROSSTRACK_INTERVAL,
            arrival_threshold:   ARRIVAL_THRESHOLD,
            xte_alarm:           XTE_ALARM,
            track_dir:           None,
            track_interval:      TRACK_INTERVAL,
            track_batch:         TRACK_BATCH,
            track_buffer_bytes:  TRACK_BUFFER_BYTES,
            track_max_bytes:     TRACK_MAX_BYTES,
            status_interval:     STATUS_INTERVAL,
            log_syslog:          false,
        }
    }
}

/// Parse `path` as a `navstat.conf` key=value configuration file.
pub fn load_config(path: &Path) -> Result<NavConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| NavError::Config(format!("cannot read {}: {e}", path.display())))?;
    Ok(parse_config(&content))
}

fn parse_config(content: &str) -> NavConfig {
    let mut cfg = NavConfig::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, val)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let val = val.trim().to_string();
        if val.is_empty() {
            continue;
        }

        match key.as_str() {
            "serial_dev"          => cfg.serial_dev          = val,
            "serial_baud"         => cfg.serial_baud         = val.parse().unwrap_or(SERIAL_BAUD),
            "serial_timeout_ms"   => cfg.serial_timeout_ms   = val.parse().unwrap_or(SERIAL_TIMEOUT_MS),
            "reconnect_attempts"  => cfg.reconnect_attempts  = val.parse().unwrap_or(RECONNECT_ATTEMPTS),
            "reconnect_delay"     => cfg.reconnect_delay     = val.parse().unwrap_or(RECONNECT_DELAY),
            "distance_unit"       => cfg.distance_unit       = val.parse().unwrap_or_default(),
            "speed_unit"          => cfg.speed_unit          = val.parse().unwrap_or_default(),
            "route_file"          => cfg.route_file          = Some(PathBuf::from(&val)),
            "position_interval"   => cfg.position_interval   = val.parse().unwrap_or(POSITION_INTERVAL),
            "arrival_interval"    => cfg.arrival_interval    = val.parse().unwrap_or(ARRIVAL_INTERVAL),
            "crosstrack_interval" => cfg.crosstrack_interval = val.parse().unwrap_or(CROSSTRACK_INTERVAL),
            "arrival_threshold"   => cfg.arrival_threshold   = val.parse().unwrap_or(ARRIVAL_THRESHOLD),
            "xte_alarm"           => cfg.xte_alarm           = val.parse().unwrap_or(XTE_ALARM),
            "track_dir"           => cfg.track_dir           = Some(PathBuf::from(&val)),
            "track_interval"      => cfg.track_interval      = val.parse().unwrap_or(TRACK_INTERVAL),
            "track_batch"         => cfg.track_batch         = val.parse().unwrap_or(TRACK_BATCH),
            "track_buffer_bytes"  => cfg.track_buffer_bytes  = val.parse().unwrap_or(TRACK_BUFFER_BYTES),
            "track_max_bytes"     => cfg.track_max_bytes     = val.parse().unwrap_or(TRACK_MAX_BYTES),
            "status_interval"     => cfg.status_interval     = val.parse().unwrap_or(STATUS_INTERVAL),
            "log_syslog"          => cfg.log_syslog          = val == "true" || val == "1" || val == "yes",
            _ => {} // ignore unknown keys
        }
    }

    cfg
}

/// Reject settings the reader or the periodic tasks cannot run with.
pub fn validate_config(cfg: &NavConfig) -> Result<()> {
    if cfg.serial_dev.is_empty() {
        return Err(NavError::Config("serial_dev is required".into()));
    }
    if serial::baud_rate(cfg.serial_baud).is_none() {
        return Err(NavError::Config(format!("unsupported serial_baud {}", cfg.serial_baud)));
    }
    if cfg.serial_timeout_ms == 0 {
        return Err(NavError::Config("serial_timeout_ms must be positive".into()));
    }
    for (name, value) in [
        ("position_interval",   cfg.position_interval),
        ("arrival_interval",    cfg.arrival_interval),
        ("crosstrack_interval", cfg.crosstrack_interval),
        ("track_interval",      cfg.track_interval),
        ("status_interval",     cfg.status_interval),
    ] {
        if value == 0 {
            return Err(NavError::Config(format!("{name} must be at least 1 second")));
        }
    }
    if cfg.track_batch == 0 {
        return Err(NavError::Config("track_batch must be at least 1".into()));
    }
    if !(cfg.arrival_threshold > 0.0) || !(cfg.xte_alarm > 0.0) {
        return Err(NavError::Config("arrival_threshold and xte_alarm must be positive".into()));
    }
    if let Some(dir) = &cfg.track_dir {
        if !dir.is_dir() {
            return Err(NavError::Config(format!("track_dir {} is not a directory", dir.display())));
        }
    }
    Ok(())
}
