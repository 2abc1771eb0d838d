//! Session manager: the periodic route and track evaluations.
//!
//! The serial reader publishes fixes into a [`FixCache`]; everything here
//! only reads snapshots of it.  A route session runs three tasks
//! (position/auto-advance, ETA, cross-track) that share one `Navigator`
//! behind a mutex.  A track session runs one task that owns its
//! [`TrackBuffer`] and sink outright.  Each task sleeps on its own interval
//! and watches a stop channel, so a stop wakes it immediately.

use std::io;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::NavConfig;
use crate::error::{NavError, Result};
use crate::gpx::{self, GpxTrackWriter};
use crate::nav::route::{Direction, Route, RoutePoint};
use crate::nav::{Navigator, RouteState};
use crate::nmea::GpsFix;

// ── Fix cache ─────────────────────────────────────────────────────────────────

/// Latest fix, replaced as a whole so readers never see a partial update.
#[derive(Debug, Clone, Default)]
pub struct FixCache {
    inner: Arc<Mutex<Option<Arc<GpsFix>>>>,
}

impl FixCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, fix: GpsFix) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = Some(Arc::new(fix));
        }
    }

    pub fn snapshot(&self) -> Option<Arc<GpsFix>> {
        self.inner.lock().ok().and_then(|g| g.clone())
    }

    /// The latest fix, if it is valid for navigation.
    pub fn navigable(&self) -> Option<Arc<GpsFix>> {
        self.snapshot().filter(|f| f.is_navigable())
    }
}

/// Run `tick` now and then every `period` until `stop` flips or its sender
/// goes away.
fn spawn_periodic<F>(
    name:     &'static str,
    period:   Duration,
    mut stop: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        while !*stop.borrow() {
            tick();
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("{name} task stopped");
    })
}

// ── Route session ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteSettings {
    pub position_interval:    Duration,
    pub arrival_interval:     Duration,
    pub crosstrack_interval:  Duration,
    /// Auto-advance proximity, km.
    pub arrival_threshold_km: f64,
    /// Cross-track alarm threshold, km.
    pub xte_alarm_km:         f64,
}

impl From<&NavConfig> for RouteSettings {
    fn from(cfg: &NavConfig) -> Self {
        Self {
            position_interval:    Duration::from_secs(cfg.position_interval),
            arrival_interval:     Duration::from_secs(cfg.arrival_interval),
            crosstrack_interval:  Duration::from_secs(cfg.crosstrack_interval),
            arrival_threshold_km: cfg.arrival_threshold,
            xte_alarm_km:         cfg.xte_alarm,
        }
    }
}

pub struct RouteSession {
    navigator: Arc<Mutex<Navigator>>,
    stop:      watch::Sender<bool>,
    tasks:     Vec<JoinHandle<()>>,
}

impl RouteSession {
    pub fn start(route: Route, fixes: FixCache, settings: RouteSettings) -> Self {
        info!(
            "route: starting with {} waypoints, first {:?}",
            route.len(),
            route.points()[0].name
        );
        let navigator = Arc::new(Mutex::new(Navigator::new(route)));
        let (stop, stop_rx) = watch::channel(false);

        let position = {
            let (nav, fixes) = (Arc::clone(&navigator), fixes.clone());
            spawn_periodic("route position", settings.position_interval, stop_rx.clone(), move || {
                let Some(fix) = fixes.navigable() else { return };
                if let Ok(mut nav) = nav.lock() {
                    if nav.update_position(&fix, settings.arrival_threshold_km) {
                        let wp = nav.current_waypoint();
                        info!("route: arrived, next waypoint {} {:?}", nav.index(), wp.name);
                    }
                }
            })
        };

        let arrival = {
            let (nav, fixes) = (Arc::clone(&navigator), fixes.clone());
            spawn_periodic("route arrival", settings.arrival_interval, stop_rx.clone(), move || {
                let Some(fix) = fixes.navigable() else { return };
                if let Ok(mut nav) = nav.lock() {
                    nav.update_eta(&fix, Utc::now());
                }
            })
        };

        let crosstrack = {
            let nav = Arc::clone(&navigator);
            spawn_periodic("route cross-track", settings.crosstrack_interval, stop_rx, move || {
                let Some(fix) = fixes.navigable() else { return };
                if let Ok(mut nav) = nav.lock() {
                    let was_alarm = nav.cross_track_alarm();
                    nav.update_cross_track(&fix, settings.xte_alarm_km);
                    match (was_alarm, nav.cross_track_alarm(), nav.cross_track()) {
                        (false, true, Some(xte)) => warn!(
                            "route: cross-track alarm, {:.2} km {:?}",
                            xte.distance_km, xte.side
                        ),
                        (true, false, _) => info!("route: cross-track alarm cleared"),
                        _ => {}
                    }
                }
            })
        };

        Self { navigator, stop, tasks: vec![position, arrival, crosstrack] }
    }

    pub fn state(&self) -> Option<RouteState> {
        self.navigator.lock().ok().map(|nav| nav.state())
    }

    /// Manual waypoint step; returns whether the waypoint changed.
    pub fn step(&self, direction: Direction) -> bool {
        self.navigator
            .lock()
            .map(|mut nav| nav.advance(direction))
            .unwrap_or(false)
    }

    /// Stop all three tasks and wait for them.
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop.send(true);
        for task in self.tasks {
            task.await?;
        }
        info!("route: stopped");
        Ok(())
    }
}

// ── Track session ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackPoint {
    pub latitude:  f64,
    pub longitude: f64,
    /// Metres; the receiver feed carries no altitude, so this is 0.
    pub elevation: f64,
    pub utc:       DateTime<Utc>,
}

impl From<&GpsFix> for TrackPoint {
    fn from(fix: &GpsFix) -> Self {
        Self {
            latitude:  fix.latitude,
            longitude: fix.longitude,
            elevation: 0.0,
            utc:       fix.utc,
        }
    }
}

/// Where track points end up.  Points arrive in capture order.
pub trait TrackSink: Send {
    fn write_points(&mut self, points: &[TrackPoint]) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

/// Points captured since the last flush.
#[derive(Debug, Default)]
pub struct TrackBuffer {
    points: Vec<TrackPoint>,
    bytes:  usize,
}

impl TrackBuffer {
    pub fn push(&mut self, point: TrackPoint) {
        self.bytes += gpx::track_point(&point).len();
        self.points.push(point);
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Size of the buffered points once written as GPX.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn should_flush(&self, batch: usize, max_bytes: usize) -> bool {
        self.points.len() >= batch || self.bytes >= max_bytes
    }

    pub fn take(&mut self) -> Vec<TrackPoint> {
        self.bytes = 0;
        mem::take(&mut self.points)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSettings {
    pub interval:     Duration,
    pub batch:        usize,
    pub buffer_bytes: usize,
}

impl From<&NavConfig> for TrackSettings {
    fn from(cfg: &NavConfig) -> Self {
        Self {
            interval:     Duration::from_secs(cfg.track_interval),
            batch:        cfg.track_batch,
            buffer_bytes: cfg.track_buffer_bytes,
        }
    }
}

pub struct TrackSession {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TrackSession {
    pub fn start(mut sink: Box<dyn TrackSink>, fixes: FixCache, settings: TrackSettings) -> Self {
        let (stop, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut buffer = TrackBuffer::default();
            while !*stop_rx.borrow() {
                if let Some(fix) = fixes.navigable() {
                    buffer.push(TrackPoint::from(fix.as_ref()));
                    if buffer.should_flush(settings.batch, settings.buffer_bytes) {
                        match flush(sink, buffer.take()).await {
                            Some(s) => sink = s,
                            None => return,
                        }
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(settings.interval) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            if !buffer.is_empty() {
                match flush(sink, buffer.take()).await {
                    Some(s) => sink = s,
                    None => return,
                }
            }
            let closed = tokio::task::spawn_blocking(move || sink.close()).await;
            match closed {
                Ok(Ok(())) => info!("track: stopped"),
                Ok(Err(e)) => warn!("track: closing sink failed: {e}"),
                Err(e) => warn!("track: closing sink failed: {e}"),
            }
        });

        Self { stop, task }
    }

    /// Stop capturing; returns once the final flush and close are done.
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop.send(true);
        self.task.await?;
        Ok(())
    }
}

/// Hand `points` to the sink on the blocking pool.  Returns the sink unless
/// the write panicked.
async fn flush(mut sink: Box<dyn TrackSink>, points: Vec<TrackPoint>) -> Option<Box<dyn TrackSink>> {
    let written = tokio::task::spawn_blocking(move || {
        let res = sink.write_points(&points);
        (sink, points.len(), res)
    })
    .await;
    match written {
        Ok((sink, n, Ok(()))) => {
            debug!("track: wrote {n} points");
            Some(sink)
        }
        Ok((sink, n, Err(e))) => {
            warn!("track: dropped {n} points: {e}");
            Some(sink)
        }
        Err(e) => {
            warn!("track: writer failed, recording stops: {e}");
            None
        }
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Owns the optional route and track sessions and switches them on and off.
pub struct SessionManager {
    config: Arc<NavConfig>,
    fixes:  FixCache,
    route:  Option<RouteSession>,
    track:  Option<TrackSession>,
}

impl SessionManager {
    pub fn new(config: Arc<NavConfig>, fixes: FixCache) -> Self {
        Self { config, fixes, route: None, track: None }
    }

    pub fn fixes(&self) -> &FixCache {
        &self.fixes
    }

    pub fn is_routing(&self) -> bool {
        self.route.is_some()
    }

    pub fn is_tracking(&self) -> bool {
        self.track.is_some()
    }

    pub fn route_state(&self) -> Option<RouteState> {
        self.route.as_ref().and_then(|r| r.state())
    }

    pub fn step_route(&self, direction: Direction) -> bool {
        self.route.as_ref().is_some_and(|r| r.step(direction))
    }

    /// Follow `points`, replacing any active route.
    pub async fn start_route(&mut self, points: Vec<RoutePoint>) -> Result<()> {
        let route = Route::new(points)?;
        self.stop_route().await?;
        let settings = RouteSettings::from(self.config.as_ref());
        self.route = Some(RouteSession::start(route, self.fixes.clone(), settings));
        Ok(())
    }

    /// Switch routing on (loading `route_file`) or off.  Returns the new mode.
    pub async fn toggle_route(&mut self) -> Result<bool> {
        if self.route.is_some() {
            self.stop_route().await?;
            return Ok(false);
        }
        let path = self
            .config
            .route_file
            .clone()
            .ok_or_else(|| NavError::Config("route_file is not configured".into()))?;
        let points = gpx::read_route(&path)?;
        self.start_route(points).await?;
        Ok(true)
    }

    pub async fn stop_route(&mut self) -> Result<()> {
        match self.route.take() {
            Some(session) => session.stop().await,
            None => Ok(()),
        }
    }

    /// Record into `sink`, replacing any active track.
    pub async fn start_track(&mut self, sink: Box<dyn TrackSink>) -> Result<()> {
        self.stop_track().await?;
        let settings = TrackSettings::from(self.config.as_ref());
        info!("track: recording every {}s", settings.interval.as_secs());
        self.track = Some(TrackSession::start(sink, self.fixes.clone(), settings));
        Ok(())
    }

    /// Switch tracking on (new GPX file in `track_dir`) or off.  Returns the
    /// new mode.
    pub async fn toggle_track(&mut self) -> Result<bool> {
        if self.track.is_some() {
            self.stop_track().await?;
            return Ok(false);
        }
        let dir = self
            .config
            .track_dir
            .clone()
            .ok_or_else(|| NavError::Config("track_dir is not configured".into()))?;
        let writer = GpxTrackWriter::create(&dir, self.config.track_max_bytes)?;
        self.start_track(Box::new(writer)).await?;
        Ok(true)
    }

    pub async fn stop_track(&mut self) -> Result<()> {
        match self.track.take() {
            Some(session) => session.stop().await,
            None => Ok(()),
        }
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        let route = self.stop_route().await;
        let track = self.stop_track().await;
        route.and(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nav::Eta;
    use crate::nmea::FixStatus;
    use chrono::TimeZone;

    fn fix(latitude: f64, longitude: f64, status: FixStatus) -> GpsFix {
        GpsFix {
            latitude,
            longitude,
            speed_over_ground:  10.0,
            course_over_ground: 90.0,
            utc:    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            status,
        }
    }

    fn equator() -> Vec<RoutePoint> {
        vec![
            RoutePoint::new("W0", 0.0, 0.0),
            RoutePoint::new("W1", 0.0, 1.0),
            RoutePoint::new("W2", 0.0, 2.0),
        ]
    }

    fn route_settings() -> RouteSettings {
        RouteSettings::from(&NavConfig::default())
    }

    #[derive(Default)]
    struct Recorded {
        batches: Vec<Vec<TrackPoint>>,
        closed:  bool,
    }

    struct RecordingSink(Arc<Mutex<Recorded>>);

    impl TrackSink for RecordingSink {
        fn write_points(&mut self, points: &[TrackPoint]) -> io::Result<()> {
            let mut rec = self.0.lock().unwrap();
            assert!(!rec.closed, "write after close");
            rec.batches.push(points.to_vec());
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            self.0.lock().unwrap().closed = true;
            Ok(())
        }
    }

    #[test]
    fn fix_cache_swaps_whole_fix() {
        let cache = FixCache::new();
        assert!(cache.snapshot().is_none());
        cache.publish(fix(1.0, 2.0, FixStatus::Valid));
        let first = cache.snapshot().unwrap();
        cache.publish(fix(3.0, 4.0, FixStatus::Invalid));
        assert_eq!((first.latitude, first.longitude), (1.0, 2.0));
        assert_eq!(cache.snapshot().unwrap().latitude, 3.0);
        assert!(cache.navigable().is_none());
    }

    #[test]
    fn track_buffer_thresholds() {
        let mut buf = TrackBuffer::default();
        let p = TrackPoint::from(&fix(0.0, 0.0, FixStatus::Valid));
        buf.push(p.clone());
        buf.push(p);
        assert!(buf.should_flush(2, usize::MAX));
        assert!(!buf.should_flush(3, usize::MAX));
        assert!(buf.should_flush(10, buf.bytes()));
        assert!(!buf.should_flush(10, buf.bytes() + 1));
        assert_eq!(buf.take().len(), 2);
        assert!(buf.is_empty());
        assert_eq!(buf.bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn route_session_advances_and_estimates() {
        let fixes = FixCache::new();
        fixes.publish(fix(0.0, 0.0, FixStatus::Valid));
        let session = RouteSession::start(Route::new(equator()).unwrap(), fixes.clone(), route_settings());

        tokio::time::sleep(Duration::from_secs(5)).await;
        let state = session.state().unwrap();
        assert_eq!(state.waypoint_index, 1);
        assert_eq!(state.waypoint.name, "W1");
        assert!(state.cross_track.is_some());
        assert!(matches!(state.total_eta, Eta::Estimate { .. }));

        assert!(session.step(Direction::Backward));
        assert_eq!(session.state().unwrap().waypoint_index, 0);
        session.stop().await.unwrap();
    }

    #[test]
    fn track_buffer_counts_written_bytes() {
        let mut buf = TrackBuffer::default();
        let p = TrackPoint::from(&fix(50.5, -1.25, FixStatus::Valid));
        let rendered = gpx::track_point(&p);
        assert!(rendered.contains("<trkpt lat=\"50.5\" lon=\"-1.25\">"));
        buf.push(p.clone());
        buf.push(p);
        assert_eq!(buf.bytes(), 2 * rendered.len());
    }

    #[tokio::test(start_paused = true)]
    async fn manager_steps_active_route() {
        let fixes = FixCache::new();
        // between W0 and W1, well clear of the arrival threshold
        fixes.publish(fix(0.0, 0.25, FixStatus::Valid));
        let mut mgr = SessionManager::new(Arc::new(NavConfig::default()), fixes);
        assert!(!mgr.step_route(Direction::Forward));

        mgr.start_route(equator()).await.unwrap();
        assert!(mgr.is_routing());
        tokio::time::sleep(Duration::from_secs(2)).await;
        let before = mgr.route_state().unwrap();
        assert_eq!(before.waypoint_index, 0);
        let leg = Route::new(equator()).unwrap().distance_from(0);

        assert!(mgr.step_route(Direction::Forward));
        let after = mgr.route_state().unwrap();
        assert_eq!(after.waypoint_index, 1);
        assert_eq!(after.waypoint.name, "W1");
        // live leg to W1 plus the W1 -> W2 leg
        let live = after.to_waypoint.unwrap().distance_km;
        let remaining = after.remaining_km.unwrap();
        assert!((remaining - (live + Route::new(equator()).unwrap().distance_from(1))).abs() < 1e-9);
        assert!(remaining < before.remaining_km.unwrap());
        assert!(remaining < leg);

        assert!(mgr.step_route(Direction::Forward));
        assert!(!mgr.step_route(Direction::Forward));
        assert_eq!(mgr.route_state().unwrap().waypoint_index, 2);

        assert!(mgr.step_route(Direction::Backward));
        assert_eq!(mgr.route_state().unwrap().waypoint_index, 1);
        mgr.shutdown().await.unwrap();
        assert!(!mgr.is_routing());
    }

    #[tokio::test(start_paused = true)]
    async fn route_session_ignores_invalid_fix() {
        let fixes = FixCache::new();
        fixes.publish(fix(0.0, 0.0, FixStatus::Invalid));
        let session = RouteSession::start(Route::new(equator()).unwrap(), fixes.clone(), route_settings());

        tokio::time::sleep(Duration::from_secs(5)).await;
        let state = session.state().unwrap();
        assert_eq!(state.waypoint_index, 0);
        assert_eq!(state.to_waypoint, None);
        assert_eq!(state.total_eta, Eta::Unknown);
        session.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn track_session_flushes_batches_and_on_stop() {
        let fixes = FixCache::new();
        fixes.publish(fix(50.0, -1.0, FixStatus::Valid));
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let settings = TrackSettings {
            interval:     Duration::from_secs(10),
            batch:        3,
            buffer_bytes: usize::MAX,
        };
        let session = TrackSession::start(Box::new(RecordingSink(Arc::clone(&recorded))), fixes.clone(), settings);

        // captures at t = 0, 10, 20 fill one batch
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(recorded.lock().unwrap().batches.len(), 1);
        assert_eq!(recorded.lock().unwrap().batches[0].len(), 3);

        // t = 30 is buffered until stop
        tokio::time::sleep(Duration::from_secs(10)).await;
        session.stop().await.unwrap();
        {
            let rec = recorded.lock().unwrap();
            assert_eq!(rec.batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 1]);
            assert!(rec.closed);
        }

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(recorded.lock().unwrap().batches.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn track_session_without_fix_writes_nothing() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let settings = TrackSettings::from(&NavConfig::default());
        let session = TrackSession::start(Box::new(RecordingSink(Arc::clone(&recorded))), FixCache::new(), settings);
        tokio::time::sleep(Duration::from_secs(120)).await;
        session.stop().await.unwrap();
        let rec = recorded.lock().unwrap();
        assert!(rec.batches.is_empty());
        assert!(rec.closed);
    }

    #[tokio::test(start_paused = true)]
    async fn manager_toggles_need_configuration() {
        let mut mgr = SessionManager::new(Arc::new(NavConfig::default()), FixCache::new());
        assert!(matches!(mgr.toggle_route().await, Err(NavError::Config(_))));
        assert!(matches!(mgr.toggle_track().await, Err(NavError::Config(_))));
        assert!(matches!(mgr.start_route(vec![]).await, Err(NavError::Route(_))));
        assert!(!mgr.is_routing());
    }

    #[tokio::test(start_paused = true)]
    async fn manager_toggles_route_and_track_files() {
        let dir = tempfile::tempdir().unwrap();
        let route_file = dir.path().join("route.gpx");
        std::fs::write(
            &route_file,
            "<gpx>\n <rte>\n  <rtept lat=\"0.0\" lon=\"0.0\">\n   <name>A</name>\n  </rtept>\n  \
             <rtept lat=\"0.0\" lon=\"1.0\">\n   <name>B</name>\n  </rtept>\n </rte>\n</gpx>\n",
        )
        .unwrap();
        let config = NavConfig {
            route_file: Some(route_file),
            track_dir:  Some(dir.path().join("tracks")),
            ..NavConfig::default()
        };
        std::fs::create_dir(dir.path().join("tracks")).unwrap();

        let fixes = FixCache::new();
        fixes.publish(fix(0.0, 0.5, FixStatus::Valid));
        let mut mgr = SessionManager::new(Arc::new(config), fixes);

        assert!(mgr.toggle_route().await.unwrap());
        assert!(mgr.toggle_track().await.unwrap());
        tokio::time::sleep(Duration::from_secs(3)).await;
        let state = mgr.route_state().unwrap();
        assert_eq!(state.waypoint_count, 2);
        assert_eq!(state.waypoint.name, "A");

        assert!(!mgr.toggle_route().await.unwrap());
        assert!(mgr.route_state().is_none());
        mgr.shutdown().await.unwrap();
        assert!(!mgr.is_tracking());

        let files: Vec<_> = std::fs::read_dir(dir.path().join("tracks")).unwrap().collect();
        assert_eq!(files.len(), 1);
        let text = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(text.contains("<trkpt lat=\"0\" lon=\"0.5\">"), "{text}");
        assert!(text.trim_end().ends_with("</gpx>"));
    }
}
