//! Serial reader for the combined GPS/AIS feed.
//!
//! The port is opened raw 8N1 with a read timeout (`VMIN = 0`, `VTIME`), so
//! a blocked read returns periodically and the loop can observe its stop
//! flag.  The loop runs in a `spawn_blocking` task, splits the byte stream
//! into sentences and hands each one to a [`Dispatcher`]:
//!
//! * `$GP…` / `$GN…`  → NMEA decoder → [`FixCache`]
//! * `!AI…` / `$PAIS` → AIS decoder  → bounded report channel
//!
//! An I/O error ends the loop and raises the connection-lost flag; the
//! supervisor in `main` decides whether to reopen the port.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::ais::{AisDecoder, AisReport};
use crate::error::Result;
use crate::framing::{FrameError, Sentence, SentenceBuffer};
use crate::nmea::{self, NmeaError};
use crate::session::FixCache;

nix::ioctl_read_bad!(fionread, libc::FIONREAD, libc::c_int);

/// Largest single read from the port.
const READ_CHUNK: usize = 512;

// ── Byte sources ──────────────────────────────────────────────────────────────

/// A readable byte stream that can report how much is already queued.
pub trait ByteSource: Read + Send {
    /// Bytes that can be read without blocking.
    fn available(&mut self) -> io::Result<usize>;
}

/// A termios-configured serial device.
#[derive(Debug)]
pub struct SerialPort {
    file: File,
    path: String,
}

impl SerialPort {
    pub fn open(path: &str, baud: u32, timeout: Duration) -> io::Result<SerialPort> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)?;
        configure_serial(&file, baud, timeout)?;
        info!("serial: opened {path} at {baud} baud");
        Ok(SerialPort { file, path: path.to_string() })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl ByteSource for SerialPort {
    fn available(&mut self) -> io::Result<usize> {
        let mut queued: libc::c_int = 0;
        // SAFETY: FIONREAD writes a single c_int through the pointer.
        unsafe { fionread(self.file.as_raw_fd(), &mut queued) }.map_err(io::Error::from)?;
        Ok(queued.max(0) as usize)
    }
}

/// Supported line speeds.
pub fn baud_rate(baud: u32) -> Option<BaudRate> {
    Some(match baud {
        1200   => BaudRate::B1200,
        2400   => BaudRate::B2400,
        4800   => BaudRate::B4800,
        9600   => BaudRate::B9600,
        19200  => BaudRate::B19200,
        38400  => BaudRate::B38400,
        57600  => BaudRate::B57600,
        115200 => BaudRate::B115200,
        _ => return None,
    })
}

/// Raw 8N1, no echo, no signals; reads return after `timeout` with no data.
fn configure_serial(file: &File, baud: u32, timeout: Duration) -> io::Result<()> {
    let rate = baud_rate(baud).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("unsupported baud rate {baud}"))
    })?;
    let mut t = termios::tcgetattr(file).map_err(io::Error::from)?;

    t.local_flags &= !(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ISIG);
    t.output_flags &= !OutputFlags::OPOST;
    t.input_flags &= !(
        InputFlags::IXON   |
        InputFlags::IXOFF  |
        InputFlags::IXANY  |
        InputFlags::ISTRIP |
        InputFlags::INPCK  |
        InputFlags::ICRNL
    );
    t.control_flags &= !(ControlFlags::CSIZE | ControlFlags::CSTOPB | ControlFlags::PARENB);
    t.control_flags |= ControlFlags::CS8 | ControlFlags::CREAD | ControlFlags::CLOCAL;

    // VTIME counts deciseconds, 1..=255
    let deciseconds = (timeout.as_millis() / 100).clamp(1, 255) as u8;
    t.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    t.control_chars[SpecialCharacterIndices::VTIME as usize] = deciseconds;

    termios::cfsetospeed(&mut t, rate).map_err(io::Error::from)?;
    termios::cfsetispeed(&mut t, rate).map_err(io::Error::from)?;
    termios::tcsetattr(file, SetArg::TCSANOW, &t).map_err(io::Error::from)?;
    Ok(())
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// Per-connection counters, logged when the reader exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub sentences:         u64,
    pub checksum_failures: u64,
    pub malformed:         u64,
    pub decode_failures:   u64,
    pub fixes:             u64,
    pub ais_reports:       u64,
    pub ais_dropped:       u64,
}

/// Routes validated sentences to the decoders and their consumers.
pub struct Dispatcher {
    fixes:   FixCache,
    ais:     AisDecoder,
    reports: mpsc::Sender<AisReport>,
    stats:   ReaderStats,
}

impl Dispatcher {
    pub fn new(fixes: FixCache, reports: mpsc::Sender<AisReport>) -> Self {
        Self { fixes, ais: AisDecoder::new(), reports, stats: ReaderStats::default() }
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Handle one raw line.  Bad lines are counted and dropped.
    pub fn dispatch_line(&mut self, line: &str) {
        let sentence = match Sentence::parse(line) {
            Ok(s) => s,
            Err(FrameError::ChecksumMismatch { expected, actual }) => {
                self.stats.checksum_failures += 1;
                trace!("dropping {line:?}: checksum {actual:02X} != {expected:02X}");
                return;
            }
            Err(e) => {
                self.stats.malformed += 1;
                trace!("dropping {line:?}: {e}");
                return;
            }
        };
        self.stats.sentences += 1;

        if sentence.starts_with("$GP") || sentence.starts_with("$GN") {
            match nmea::decode(&sentence) {
                Ok(fix) => {
                    self.stats.fixes += 1;
                    self.fixes.publish(fix);
                }
                Err(NmeaError::Unsupported(_)) => {}
                Err(e) => {
                    self.stats.decode_failures += 1;
                    debug!("NMEA: dropping {sentence}: {e}");
                }
            }
        } else if sentence.starts_with("!AI") || sentence.starts_with("$PAIS") {
            match self.ais.decode(&sentence) {
                Ok(Some(report)) => self.forward(report),
                Ok(None) => {}
                Err(e) => {
                    self.stats.decode_failures += 1;
                    debug!("AIS: dropping {sentence}: {e}");
                }
            }
        }
    }

    fn forward(&mut self, report: AisReport) {
        match self.reports.try_send(report) {
            Ok(()) => self.stats.ais_reports += 1,
            Err(TrySendError::Full(r)) => {
                self.stats.ais_dropped += 1;
                warn!("AIS: consumer lagging, dropped message {} from {}", r.message_id, r.mmsi);
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.ais_dropped += 1;
                trace!("AIS: no consumer");
            }
        }
    }
}

// ── Reader task ───────────────────────────────────────────────────────────────

pub struct ReaderHandle {
    stop:            Arc<AtomicBool>,
    connection_lost: Arc<AtomicBool>,
    task:            JoinHandle<ReaderStats>,
}

impl ReaderHandle {
    /// Ask the loop to exit; observed within one read timeout.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_connection_lost(&self) -> bool {
        self.connection_lost.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit and collect its counters.
    pub async fn join(self) -> Result<ReaderStats> {
        Ok(self.task.await?)
    }
}

/// Run the reader loop over `source` on the blocking pool.
pub fn spawn_reader<S: ByteSource + 'static>(source: S, dispatcher: Dispatcher) -> ReaderHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let connection_lost = Arc::new(AtomicBool::new(false));
    let (stop_flag, lost_flag) = (Arc::clone(&stop), Arc::clone(&connection_lost));

    let task = tokio::task::spawn_blocking(move || reader_loop(source, dispatcher, &stop_flag, &lost_flag));
    ReaderHandle { stop, connection_lost, task }
}

fn reader_loop<S: ByteSource>(
    mut source:     S,
    mut dispatcher: Dispatcher,
    stop:           &AtomicBool,
    lost:           &AtomicBool,
) -> ReaderStats {
    let mut lines = SentenceBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];

    while !stop.load(Ordering::Relaxed) {
        // drain what is queued; with nothing queued block for one timeout
        let want = match source.available() {
            Ok(n) => n.clamp(1, READ_CHUNK),
            Err(e) => {
                warn!("serial: FIONREAD failed: {e}");
                lost.store(true, Ordering::Relaxed);
                break;
            }
        };
        match source.read(&mut chunk[..want]) {
            Ok(0) => continue,
            Ok(n) => {
                lines.push(&chunk[..n]);
                while let Some(line) = lines.next_line() {
                    dispatcher.dispatch_line(&line);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("serial: read failed: {e}");
                lost.store(true, Ordering::Relaxed);
                break;
            }
        }
    }

    if lines.pending() > 0 {
        debug!("serial: discarding {} bytes of an unterminated sentence", lines.pending());
    }
    if dispatcher.ais.has_pending_fragments() {
        debug!("serial: discarding an incomplete multipart AIS message");
    }
    let stats = dispatcher.stats();
    info!(
        "serial: reader exiting: {} sentences, {} fixes, {} AIS ({} dropped), \
         {} checksum failures, {} malformed, {} decode failures",
        stats.sentences,
        stats.fixes,
        stats.ais_reports,
        stats.ais_dropped,
        stats.checksum_failures,
        stats.malformed,
        stats.decode_failures
    );
    stats
}
