//! Minimal GPX support: reading `<rtept>` routes and writing tracks.
//!
//! The reader is line oriented and understands the layout produced by
//! common chart plotters (one element per line, or a whole `<rtept>` on one
//! line); it is not a general XML parser.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{info, warn};

use crate::error::{NavError, Result};
use crate::nav::route::RoutePoint;
use crate::session::{TrackPoint, TrackSink};

const TRACK_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\" ?>\n\
                            <gpx version=\"1.1\" creator=\"navstat\">\n\
                            \t<trk>\n\t\t<name>NAVSTAT TRACK</name>\n\t\t<trkseg>\n";
const TRACK_FOOTER: &str = "\t\t</trkseg>\n\t</trk>\n</gpx>\n";

// ── Routes ────────────────────────────────────────────────────────────────────

/// Read the route points of a GPX file in document order.
pub fn read_route(path: &Path) -> Result<Vec<RoutePoint>> {
    let text = fs::read_to_string(path)
        .map_err(|e| NavError::Route(format!("cannot read {}: {e}", path.display())))?;
    parse_route(&text).map_err(|e| NavError::Route(format!("{}: {e}", path.display())))
}

fn parse_route(text: &str) -> std::result::Result<Vec<RoutePoint>, String> {
    let mut points = Vec::new();
    let mut pending: Option<RoutePoint> = None;

    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.starts_with("<rtept") {
            if let Some(p) = pending.take() {
                points.push(p);
            }
            let lat = attribute(line, "lat").ok_or_else(|| format!("line {}: bad lat", n + 1))?;
            let lon = attribute(line, "lon").ok_or_else(|| format!("line {}: bad lon", n + 1))?;
            pending = Some(RoutePoint::new(String::new(), lat, lon));
        }
        if let Some(p) = pending.as_mut() {
            if let Some(name) = element_text(line, "name") {
                p.name = name.to_string();
            }
            if line.contains("</rtept>") {
                points.extend(pending.take());
            }
        }
    }
    points.extend(pending);

    for (i, p) in points.iter_mut().enumerate() {
        if p.name.is_empty() {
            p.name = format!("WP{}", i + 1);
        }
    }
    Ok(points)
}

/// Numeric value of `name="..."` within a tag.
fn attribute(line: &str, name: &str) -> Option<f64> {
    let key = format!(" {name}=\"");
    let start = line.find(&key)? + key.len();
    let len = line[start..].find('"')?;
    line[start..start + len].trim().parse().ok()
}

/// Text of `<tag>...</tag>` when both ends are on this line.
fn element_text<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = line.find(&open)? + open.len();
    let len = line[start..].find(&close)?;
    Some(line[start..start + len].trim())
}

// ── Tracks ────────────────────────────────────────────────────────────────────

/// Track sink writing GPX files into a directory, starting a new file once
/// the current one grows past `max_bytes`.
pub struct GpxTrackWriter {
    dir:       PathBuf,
    max_bytes: u64,
    out:       Option<BufWriter<File>>,
    path:      PathBuf,
    written:   u64,
}

impl GpxTrackWriter {
    pub fn create(dir: &Path, max_bytes: u64) -> Result<Self> {
        let mut writer = Self {
            dir: dir.to_path_buf(),
            max_bytes,
            out: None,
            path: PathBuf::new(),
            written: 0,
        };
        writer.open_next()?;
        Ok(writer)
    }

    /// File currently being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_next(&mut self) -> io::Result<()> {
        let stamp = Local::now().format("%Y-%m-%d %H-%M").to_string();
        let mut attempt = 0;
        let (file, path) = loop {
            let name = match attempt {
                0 => format!("{stamp}.gpx"),
                n => format!("{stamp} ({n}).gpx"),
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(f) => break (f, path),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => attempt += 1,
                Err(e) => return Err(e),
            }
        };
        info!("track: writing {}", path.display());

        let mut out = BufWriter::new(file);
        out.write_all(TRACK_HEADER.as_bytes())?;
        out.flush()?;
        self.out = Some(out);
        self.path = path;
        self.written = TRACK_HEADER.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(mut out) = self.out.take() {
            out.write_all(TRACK_FOOTER.as_bytes())?;
            out.flush()?;
        }
        Ok(())
    }
}

/// One `<trkpt>` element as written to the file.
pub fn track_point(p: &TrackPoint) -> String {
    format!(
        "\t\t\t<trkpt lat=\"{}\" lon=\"{}\">\n\t\t\t\t<ele>{}</ele>\n\t\t\t\t<time>{}</time>\n\t\t\t</trkpt>\n",
        p.latitude,
        p.longitude,
        p.elevation,
        p.utc.format("%Y-%m-%dT%H:%M:%SZ")
    )
}

impl TrackSink for GpxTrackWriter {
    fn write_points(&mut self, points: &[TrackPoint]) -> io::Result<()> {
        if self.out.is_none() {
            self.open_next()?;
        }
        if let Some(out) = self.out.as_mut() {
            for p in points {
                let text = track_point(p);
                out.write_all(text.as_bytes())?;
                self.written += text.len() as u64;
            }
            out.flush()?;
        }
        if self.written > self.max_bytes {
            self.finish()?;
            self.open_next()?;
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.finish()
    }
}

impl Drop for GpxTrackWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("track: closing {} failed: {e}", self.path.display());
        }
    }
}
