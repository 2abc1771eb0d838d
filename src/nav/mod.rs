//! Navigation engine: route sequencing, cross-track error and ETA.
//!
//! All distances are kept in kilometres and all speeds in knots; conversion
//! to the configured display units happens only at the edges (see
//! [`geo::DistanceUnit`] / [`geo::SpeedUnit`]).  Values that cannot be known
//! yet (no fix seen, no previous waypoint, zero speed) are `None` or
//! [`Eta::Unknown`], never zero.

pub mod geo;
pub mod route;

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::nmea::GpsFix;
use geo::{haversine, Leg, EARTH_RADIUS_KM, KM_PER_NAUTICAL_MILE};
use route::{Direction, Route, RoutePoint};

/// Hours beyond which an ETA is reported as [`Eta::Beyond`].
const ETA_CEILING_HOURS: i64 = 1000;

// ── ETA ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "eta", rename_all = "snake_case")]
pub enum Eta {
    /// Speed is zero or unknown.
    Unknown,
    /// More than the display ceiling.
    Beyond,
    Estimate {
        hours:   u32,
        minutes: u32,
        arrival: DateTime<Utc>,
    },
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eta::Unknown => f.write_str("--"),
            Eta::Beyond => write!(f, ">{ETA_CEILING_HOURS}h"),
            Eta::Estimate { hours, minutes, arrival } => {
                write!(f, "{hours}h{minutes:02}m ({})", arrival.format("%Y-%m-%d %H:%M"))
            }
        }
    }
}

/// Time to cover `distance_km` at `speed_knots`, counted from `now`.
pub fn estimate(distance_km: f64, speed_knots: f64, now: DateTime<Utc>) -> Eta {
    let speed = (speed_knots * 100.0).round() / 100.0;
    if !speed.is_finite() || speed <= 0.0 || !distance_km.is_finite() || distance_km < 0.0 {
        return Eta::Unknown;
    }
    let hours = distance_km / (speed * KM_PER_NAUTICAL_MILE);
    let mut whole = hours.trunc() as i64;
    let mut minutes = (hours.fract() * 60.0).round() as i64;
    if minutes == 60 {
        whole += 1;
        minutes = 0;
    }
    if whole > ETA_CEILING_HOURS {
        return Eta::Beyond;
    }
    Eta::Estimate {
        hours:   whole as u32,
        minutes: minutes as u32,
        arrival: now + TimeDelta::minutes(whole * 60 + minutes),
    }
}

// ── Cross-track ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Perpendicular distance from the active leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CrossTrack {
    /// Kilometres, always non-negative.
    pub distance_km: f64,
    pub side:        Side,
}

// ── Navigator ─────────────────────────────────────────────────────────────────

/// Point-in-time copy of the navigator's outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteState {
    pub waypoint_index:       usize,
    pub waypoint_count:       usize,
    pub waypoint:             RoutePoint,
    /// Live leg from the last fix to the active waypoint.
    pub to_waypoint:          Option<Leg>,
    pub remaining_km:         Option<f64>,
    pub cross_track:          Option<CrossTrack>,
    pub cross_track_alarm:    bool,
    pub waypoint_eta:         Eta,
    pub total_eta:            Eta,
}

/// Follows a route against incoming fixes.
#[derive(Debug, Clone)]
pub struct Navigator {
    route:        Route,
    index:        usize,
    last_fix:     Option<(f64, f64)>,
    to_waypoint:  Option<Leg>,
    remaining_km: Option<f64>,
    cross_track:  Option<CrossTrack>,
    xte_alarm:    bool,
    waypoint_eta: Eta,
    total_eta:    Eta,
}

impl Navigator {
    pub fn new(route: Route) -> Self {
        Self {
            route,
            index:        0,
            last_fix:     None,
            to_waypoint:  None,
            remaining_km: None,
            cross_track:  None,
            xte_alarm:    false,
            waypoint_eta: Eta::Unknown,
            total_eta:    Eta::Unknown,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_waypoint(&self) -> &RoutePoint {
        &self.route.points()[self.index]
    }

    /// The waypoint the active leg starts from; `None` on the first leg.
    pub fn previous_waypoint(&self) -> Option<&RoutePoint> {
        self.index.checked_sub(1).and_then(|i| self.route.get(i))
    }

    /// Move one waypoint along the route, clamped at both ends.
    /// Returns whether the active waypoint changed.
    pub fn advance(&mut self, direction: Direction) -> bool {
        let next = match direction {
            Direction::Forward => (self.index + 1).min(self.route.len() - 1),
            Direction::Backward => self.index.saturating_sub(1),
        };
        let changed = next != self.index;
        self.index = next;
        self.recompute();
        changed
    }

    /// Refresh the live leg from a fix, auto-advancing at most once when the
    /// active waypoint is closer than `threshold_km`.  Returns whether an
    /// advance happened.
    pub fn update_position(&mut self, fix: &GpsFix, threshold_km: f64) -> bool {
        self.last_fix = Some((fix.latitude, fix.longitude));
        self.recompute();
        let close = self.to_waypoint.is_some_and(|leg| leg.distance_km < threshold_km);
        close && self.advance(Direction::Forward)
    }

    fn recompute(&mut self) {
        let wp = &self.route.points()[self.index];
        self.to_waypoint = self
            .last_fix
            .map(|(lat, lon)| haversine(lat, lon, wp.latitude, wp.longitude));
        self.remaining_km = self
            .to_waypoint
            .map(|leg| leg.distance_km + self.route.distance_from(self.index));
    }

    /// Cross-track error of `fix` relative to the active leg.  There is no
    /// leg before the first waypoint, so the result is cleared there.
    pub fn update_cross_track(&mut self, fix: &GpsFix, alarm_km: f64) {
        let Some(prev) = self.previous_waypoint() else {
            self.cross_track = None;
            self.xte_alarm = false;
            return;
        };
        let from_prev = haversine(prev.latitude, prev.longitude, fix.latitude, fix.longitude);
        let delta = (from_prev.bearing - prev.bearing_to_next).to_radians();
        let xte = ((from_prev.distance_km / EARTH_RADIUS_KM).sin() * delta.sin()).asin() * EARTH_RADIUS_KM;

        let side = if xte < 0.0 { Side::Left } else { Side::Right };
        let distance_km = xte.abs();
        self.cross_track = Some(CrossTrack { distance_km, side });
        self.xte_alarm = distance_km >= alarm_km;
    }

    /// Waypoint and whole-route ETAs at the fix's speed over ground.
    pub fn update_eta(&mut self, fix: &GpsFix, now: DateTime<Utc>) {
        let speed = fix.speed_over_ground;
        self.waypoint_eta = self
            .to_waypoint
            .map_or(Eta::Unknown, |leg| estimate(leg.distance_km, speed, now));
        self.total_eta = self
            .remaining_km
            .map_or(Eta::Unknown, |km| estimate(km, speed, now));
    }

    pub fn cross_track(&self) -> Option<CrossTrack> {
        self.cross_track
    }

    pub fn cross_track_alarm(&self) -> bool {
        self.xte_alarm
    }

    pub fn state(&self) -> RouteState {
        RouteState {
            waypoint_index:    self.index,
            waypoint_count:    self.route.len(),
            waypoint:          self.current_waypoint().clone(),
            to_waypoint:       self.to_waypoint,
            remaining_km:      self.remaining_km,
            cross_track:       self.cross_track,
            cross_track_alarm: self.xte_alarm,
            waypoint_eta:      self.waypoint_eta,
            total_eta:         self.total_eta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea::FixStatus;
    use chrono::TimeZone;

    fn fix(latitude: f64, longitude: f64, knots: f64) -> GpsFix {
        GpsFix {
            latitude,
            longitude,
            speed_over_ground:  knots,
            course_over_ground: 90.0,
            utc:    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            status: FixStatus::Valid,
        }
    }

    /// Three waypoints due east along the equator, one degree apart.
    fn equator_route() -> Route {
        Route::new(vec![
            RoutePoint::new("W0", 0.0, 0.0),
            RoutePoint::new("W1", 0.0, 1.0),
            RoutePoint::new("W2", 0.0, 2.0),
        ])
        .unwrap()
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn advance_clamps_at_both_ends() {
        let mut nav = Navigator::new(equator_route());
        assert_eq!(nav.index(), 0);
        assert!(!nav.advance(Direction::Backward));
        assert_eq!(nav.index(), 0);
        assert!(nav.advance(Direction::Forward));
        assert!(nav.advance(Direction::Forward));
        assert!(!nav.advance(Direction::Forward));
        assert_eq!(nav.index(), 2);
        assert_eq!(nav.current_waypoint().name, "W2");
    }

    #[test]
    fn remaining_distance_needs_a_fix() {
        let mut nav = Navigator::new(equator_route());
        assert_eq!(nav.state().remaining_km, None);
        nav.update_position(&fix(0.0, -1.0, 5.0), 0.02);
        let state = nav.state();
        assert_eq!(state.to_waypoint.map(|l| l.distance_km), Some(111.32));
        assert_eq!(state.remaining_km, Some(111.32 + 111.32 + 111.32));
    }

    #[test]
    fn auto_advance_happens_once_per_update() {
        // W0 and W1 both within the threshold of the fix
        let route = Route::new(vec![
            RoutePoint::new("W0", 0.0, 0.0),
            RoutePoint::new("W1", 0.0, 0.0001),
            RoutePoint::new("W2", 0.0, 1.0),
        ])
        .unwrap();
        let mut nav = Navigator::new(route);
        assert!(nav.update_position(&fix(0.0, 0.0, 5.0), 0.02));
        assert_eq!(nav.index(), 1);
        assert!(nav.update_position(&fix(0.0, 0.0, 5.0), 0.02));
        assert_eq!(nav.index(), 2);
        assert!(!nav.update_position(&fix(0.0, 0.0, 5.0), 0.02));
        assert_eq!(nav.index(), 2);
    }

    #[test]
    fn last_waypoint_holds() {
        let mut nav = Navigator::new(equator_route());
        nav.advance(Direction::Forward);
        nav.advance(Direction::Forward);
        assert!(!nav.update_position(&fix(0.0, 2.0, 5.0), 0.02));
        assert_eq!(nav.index(), 2);
        assert_eq!(nav.state().remaining_km, Some(0.0));
    }

    #[test]
    fn cross_track_absent_on_first_leg() {
        let mut nav = Navigator::new(equator_route());
        nav.update_cross_track(&fix(0.5, 0.5, 5.0), 0.5);
        assert_eq!(nav.cross_track(), None);
        assert!(!nav.cross_track_alarm());
    }

    #[test]
    fn cross_track_side_and_alarm() {
        let mut nav = Navigator::new(equator_route());
        nav.advance(Direction::Forward);

        // north of an eastbound leg is to port
        nav.update_cross_track(&fix(0.01, 0.5, 5.0), 0.5);
        let xte = nav.cross_track().unwrap();
        assert_eq!(xte.side, Side::Left);
        assert!(xte.distance_km > 0.5 && xte.distance_km < 1.5, "{xte:?}");
        assert!(nav.cross_track_alarm());

        nav.update_cross_track(&fix(-0.01, 0.5, 5.0), 5.0);
        let xte = nav.cross_track().unwrap();
        assert_eq!(xte.side, Side::Right);
        assert!(!nav.cross_track_alarm());

        nav.update_cross_track(&fix(0.0, 0.5, 5.0), 0.5);
        assert_eq!(nav.cross_track().unwrap().distance_km, 0.0);
        assert!(!nav.cross_track_alarm());
    }

    #[test]
    fn eta_unknown_without_speed() {
        assert_eq!(estimate(10.0, 0.0, noon()), Eta::Unknown);
        assert_eq!(estimate(10.0, 0.004, noon()), Eta::Unknown);
        assert_eq!(estimate(10.0, -3.0, noon()), Eta::Unknown);
        assert_eq!(estimate(10.0, f64::NAN, noon()), Eta::Unknown);
    }

    #[test]
    fn eta_estimate_and_ceiling() {
        // 18.52 km at 10 kn is exactly one hour
        assert_eq!(
            estimate(18.52, 10.0, noon()),
            Eta::Estimate {
                hours:   1,
                minutes: 0,
                arrival: noon() + TimeDelta::hours(1),
            }
        );
        // 1.5 h
        let Eta::Estimate { hours, minutes, .. } = estimate(27.78, 10.0, noon()) else {
            panic!();
        };
        assert_eq!((hours, minutes), (1, 30));
        assert_eq!(estimate(20_000.0, 0.1, noon()), Eta::Beyond);
    }

    #[test]
    fn eta_minutes_carry_into_hours() {
        // 1h59m45s rounds to 2h00m
        let km = 10.0 * KM_PER_NAUTICAL_MILE * (2.0 - 15.0 / 3600.0);
        let Eta::Estimate { hours, minutes, arrival } = estimate(km, 10.0, noon()) else {
            panic!();
        };
        assert_eq!((hours, minutes), (2, 0));
        assert_eq!(arrival, noon() + TimeDelta::hours(2));
        assert_eq!(
            Eta::Estimate { hours, minutes, arrival }.to_string(),
            "2h00m (2024-06-01 14:00)"
        );
    }

    #[test]
    fn navigator_eta_uses_live_leg() {
        let mut nav = Navigator::new(equator_route());
        let f = fix(0.0, -1.0, 10.0);
        nav.update_eta(&f, noon());
        assert_eq!(nav.state().waypoint_eta, Eta::Unknown);
        nav.update_position(&f, 0.02);
        nav.update_eta(&f, noon());
        let state = nav.state();
        assert!(matches!(state.waypoint_eta, Eta::Estimate { hours: 6, .. }));
        assert!(matches!(state.total_eta, Eta::Estimate { hours: 18, .. }));
    }
}
