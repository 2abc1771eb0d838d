//! navstat: NMEA0183/AIS navigation daemon.
//!
//! Reads a GPS/AIS receiver on a serial port, follows an optional GPX route
//! and records an optional GPX track.  Decoded AIS reports are written to
//! stdout as JSON lines.
//!
//! Usage:
//!   navstat -c /etc/navstat/navstat.conf
//!   navstat -c /etc/navstat/navstat.conf --stderr --verbose
//!
//! Operator commands are read from stdin, one per line:
//!   next | prev     step the active waypoint forward / back
//!   route | track   toggle route following / track recording
//!   status          log the current position and route summary
//!
//! SIGUSR1 and SIGUSR2 toggle track recording and route following as well.

mod ais;
mod config;
mod error;
mod framing;
mod gpx;
mod nav;
mod nmea;
mod serial;
mod session;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{debug, error, info, trace, warn};
use tokio::io::AsyncWriteExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};

use crate::ais::AisReport;
use crate::config::NavConfig;
use crate::nav::route::Direction;
use crate::serial::{Dispatcher, SerialPort};
use crate::session::{FixCache, SessionManager};

/// AIS reports buffered between the reader and the stdout writer.
const AIS_QUEUE: usize = 256;
/// How often the supervisor checks the reader's connection flag.
const SUPERVISE_PERIOD: Duration = Duration::from_secs(1);
/// Operator commands queued from stdin.
const COMMAND_QUEUE: usize = 16;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "navstat", about = "NMEA0183/AIS navigation daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/navstat/navstat.conf")]
    config: PathBuf,

    /// Log to stderr instead of syslog.
    #[arg(long)]
    stderr: bool,

    /// Debug-level logging.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Serial device, overriding `serial_dev`.
    #[arg(long)]
    device: Option<String>,

    /// Baud rate, overriding `serial_baud`.
    #[arg(long)]
    baud: Option<u32>,

    /// GPX route to follow, overriding `route_file`.
    #[arg(long)]
    route: Option<PathBuf>,

    /// Track directory, overriding `track_dir`.
    #[arg(long = "track-dir")]
    track_dir: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, cfg: NavConfig) -> NavConfig {
        NavConfig {
            serial_dev:  self.device.clone().unwrap_or(cfg.serial_dev),
            serial_baud: self.baud.unwrap_or(cfg.serial_baud),
            route_file:  self.route.clone().or(cfg.route_file),
            track_dir:   self.track_dir.clone().or(cfg.track_dir),
            ..cfg
        }
    }
}

// ── Operator commands ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    NextWaypoint,
    PreviousWaypoint,
    ToggleRoute,
    ToggleTrack,
    Status,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "next" | "n"   => Ok(Command::NextWaypoint),
            "prev" | "p"   => Ok(Command::PreviousWaypoint),
            "route" | "r"  => Ok(Command::ToggleRoute),
            "track" | "t"  => Ok(Command::ToggleTrack),
            "status" | "s" => Ok(Command::Status),
            other => Err(format!("unknown command {other:?}")),
        }
    }
}

/// Read commands from stdin on a plain thread: a blocked stdin read cannot
/// be cancelled, and a detached thread does not hold up runtime shutdown.
fn spawn_command_reader() -> mpsc::Receiver<Command> {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let spawned = thread::Builder::new().name("stdin".into()).spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(cmd) => {
                    if tx.blocking_send(cmd).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{e}"),
            }
        }
        debug!("stdin closed, no more operator commands");
    });
    if let Err(e) = spawned {
        warn!("cannot read operator commands: {e}");
    }
    rx
}

async fn handle_command(cmd: Command, cfg: &NavConfig, sessions: &mut SessionManager) {
    match cmd {
        Command::NextWaypoint | Command::PreviousWaypoint => {
            let direction = if cmd == Command::NextWaypoint { Direction::Forward } else { Direction::Backward };
            if !sessions.is_routing() {
                warn!("no active route");
            } else if sessions.step_route(direction) {
                if let Some(state) = sessions.route_state() {
                    info!(
                        "route: waypoint {}/{} {}",
                        state.waypoint_index + 1,
                        state.waypoint_count,
                        state.waypoint.name
                    );
                }
            } else {
                info!("route: already at the {} waypoint", match direction {
                    Direction::Forward => "last",
                    Direction::Backward => "first",
                });
            }
        }
        Command::ToggleRoute => match sessions.toggle_route().await {
            Ok(on) => info!("route following {}", if on { "on" } else { "off" }),
            Err(e) => warn!("cannot toggle route: {e}"),
        },
        Command::ToggleTrack => match sessions.toggle_track().await {
            Ok(on) => info!("track recording {}", if on { "on" } else { "off" }),
            Err(e) => warn!("cannot toggle track: {e}"),
        },
        Command::Status => log_status(cfg, sessions),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A missing file is fine when everything comes from defaults and flags.
    let cfg = if cli.config.exists() {
        match config::load_config(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("navstat: config error: {e}");
                process::exit(1);
            }
        }
    } else {
        NavConfig::default()
    };
    let cfg = cli.apply(cfg);
    if let Err(e) = config::validate_config(&cfg) {
        eprintln!("navstat: config validation: {e}");
        process::exit(1);
    }

    let use_syslog = cfg.log_syslog && !cli.stderr;
    setup_logging(use_syslog, cli.verbose).expect("failed to set up logging");

    if let Err(e) = run(Arc::new(cfg)).await {
        error!("{e:#}");
        process::exit(1);
    }
}

async fn run(cfg: Arc<NavConfig>) -> anyhow::Result<()> {
    info!(
        "navstat starting on {} at {} baud",
        cfg.serial_dev, cfg.serial_baud
    );

    let fixes = FixCache::new();
    let (stop_tx, stop_rx) = watch::channel(false);
    let (ais_tx, ais_rx) = mpsc::channel(AIS_QUEUE);

    let ais_task = tokio::spawn(write_ais_reports(ais_rx));
    let mut reader = tokio::spawn(supervise_reader(
        Arc::clone(&cfg),
        fixes.clone(),
        ais_tx,
        stop_rx,
    ));

    let mut sessions = SessionManager::new(Arc::clone(&cfg), fixes);
    if cfg.route_file.is_some() {
        sessions.toggle_route().await.context("starting route")?;
    }
    if cfg.track_dir.is_some() {
        sessions.toggle_track().await.context("starting track")?;
    }

    let mut usr1 = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;
    let mut usr2 = signal(SignalKind::user_defined2()).context("installing SIGUSR2 handler")?;
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut commands = spawn_command_reader();
    let period = Duration::from_secs(cfg.status_interval);
    let mut status = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    let mut reader_gave_up = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            _ = term.recv() => {
                info!("terminated, shutting down");
                break;
            }
            _ = usr1.recv() => handle_command(Command::ToggleTrack, &cfg, &mut sessions).await,
            _ = usr2.recv() => handle_command(Command::ToggleRoute, &cfg, &mut sessions).await,
            Some(cmd) = commands.recv() => handle_command(cmd, &cfg, &mut sessions).await,
            _ = status.tick() => log_status(&cfg, &sessions),
            res = &mut reader => {
                if let Err(e) = res {
                    error!("reader supervisor failed: {e}");
                }
                reader_gave_up = true;
                break;
            }
        }
    }

    let _ = stop_tx.send(true);
    if !reader_gave_up {
        reader.await.context("joining reader supervisor")?;
    }
    sessions.shutdown().await.context("stopping sessions")?;
    // The reader owned the last sender, so the writer drains and exits.
    ais_task.await.context("joining AIS writer")?;

    if reader_gave_up {
        anyhow::bail!("serial device {} unavailable", cfg.serial_dev);
    }
    info!("navstat stopped");
    Ok(())
}

// ── Reader supervision ────────────────────────────────────────────────────────

/// Keep a reader running on the configured port, reopening it after a
/// connection loss up to `reconnect_attempts` times in a row.  Returns when
/// `stop` flips or the attempts are used up.
async fn supervise_reader(
    cfg:      Arc<NavConfig>,
    fixes:    FixCache,
    reports:  mpsc::Sender<AisReport>,
    mut stop: watch::Receiver<bool>,
) {
    let timeout = Duration::from_millis(cfg.serial_timeout_ms);
    let mut failures = 0u32;

    while !*stop.borrow() {
        match SerialPort::open(&cfg.serial_dev, cfg.serial_baud, timeout) {
            Ok(port) => {
                failures = 0;
                let path = port.path().to_string();
                let dispatcher = Dispatcher::new(fixes.clone(), reports.clone());
                let handle = serial::spawn_reader(port, dispatcher);

                let stopped = loop {
                    if handle.is_connection_lost() || handle.is_finished() {
                        break false;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(SUPERVISE_PERIOD) => {}
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                break true;
                            }
                        }
                    }
                };
                handle.stop();
                if let Err(e) = handle.join().await {
                    warn!("serial: reader task failed: {e}");
                }
                if stopped {
                    return;
                }
                warn!("serial: lost connection to {path}");
            }
            Err(e) => warn!("serial: cannot open {}: {e}", cfg.serial_dev),
        }

        failures += 1;
        if failures > cfg.reconnect_attempts {
            error!(
                "serial: giving up on {} after {} attempts",
                cfg.serial_dev, cfg.reconnect_attempts
            );
            return;
        }
        info!(
            "serial: reconnecting in {}s (attempt {failures}/{})",
            cfg.reconnect_delay, cfg.reconnect_attempts
        );
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(cfg.reconnect_delay)) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

// ── Outputs ───────────────────────────────────────────────────────────────────

/// One JSON object per line on stdout for each decoded AIS report.
async fn write_ais_reports(mut reports: mpsc::Receiver<AisReport>) {
    let mut out = tokio::io::stdout();
    while let Some(report) = reports.recv().await {
        if !report.decoded() {
            debug!("ais: message {} from {} has no decoder", report.message_id, report.mmsi);
        } else if let Some((lat, lon)) = report.position() {
            trace!("ais: {} at {lat:.5},{lon:.5}", report.mmsi);
        }
        let mut line = match serde_json::to_vec(&report) {
            Ok(l) => l,
            Err(e) => {
                warn!("ais: cannot serialise report from {}: {e}", report.mmsi);
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = out.write_all(&line).await {
            error!("ais: stdout closed: {e}");
            break;
        }
        if let Err(e) = out.flush().await {
            error!("ais: stdout closed: {e}");
            break;
        }
    }
}

/// Position and route summary in the configured units.
fn log_status(cfg: &NavConfig, sessions: &SessionManager) {
    let Some(fix) = sessions.fixes().snapshot() else {
        info!("status: no fix");
        return;
    };
    let dist = cfg.distance_unit;
    info!(
        "status: {:.5},{:.5} {:?} sog {:.1}{} cog {:.0} at {}",
        fix.latitude,
        fix.longitude,
        fix.status,
        cfg.speed_unit.from_knots(fix.speed_over_ground),
        cfg.speed_unit.label(),
        fix.course_over_ground,
        fix.utc_iso()
    );

    info!(
        "status: route {}, track {}",
        if sessions.is_routing() { "on" } else { "off" },
        if sessions.is_tracking() { "on" } else { "off" }
    );
    let Some(state) = sessions.route_state() else {
        return;
    };
    let to_waypoint = match state.to_waypoint {
        Some(leg) => format!("{:.2}{} @ {:03}", dist.from_km(leg.distance_km), dist.label(), leg.bearing),
        None => "--".to_string(),
    };
    let remaining = match state.remaining_km {
        Some(km) => format!("{:.2}{}", dist.from_km(km), dist.label()),
        None => "--".to_string(),
    };
    let xte = match state.cross_track {
        Some(x) => format!("{:.2}{} {:?}", dist.from_km(x.distance_km), dist.label(), x.side),
        None => "--".to_string(),
    };
    info!(
        "route: wp {}/{} {} {to_waypoint} eta {} | remaining {remaining} eta {} | xte {xte}{}",
        state.waypoint_index + 1,
        state.waypoint_count,
        state.waypoint.name,
        state.waypoint_eta,
        state.total_eta,
        if state.cross_track_alarm { " ALARM" } else { "" }
    );
}

// ── Logging setup ─────────────────────────────────────────────────────────────

fn setup_logging(use_syslog: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process:  "navstat".into(),
            pid:      process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| anyhow::anyhow!("syslog connect failed: {e}"))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|()| log::set_max_level(level))
            .map_err(|e| anyhow::anyhow!("set_logger: {e}"))?;
    } else {
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_commands() {
        assert_eq!("next".parse::<Command>(), Ok(Command::NextWaypoint));
        assert_eq!(" P\n".parse::<Command>(), Ok(Command::PreviousWaypoint));
        assert_eq!("Route".parse::<Command>(), Ok(Command::ToggleRoute));
        assert_eq!("t".parse::<Command>(), Ok(Command::ToggleTrack));
        assert_eq!("status".parse::<Command>(), Ok(Command::Status));
        assert!("skip".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
    }

    #[test]
    fn cli_overrides_config() {
        let cli = Cli::parse_from(["navstat", "--device", "/dev/ttyS2", "--baud", "38400"]);
        let cfg = cli.apply(NavConfig::default());
        assert_eq!(cfg.serial_dev, "/dev/ttyS2");
        assert_eq!(cfg.serial_baud, 38400);
        assert_eq!(cfg.route_file, None);
    }
}
