//! Routes: ordered waypoints with precomputed legs.

use serde::Serialize;

use super::geo::haversine;
use crate::error::{NavError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePoint {
    pub name:             String,
    pub latitude:         f64,
    pub longitude:        f64,
    /// Kilometres to the following waypoint; 0 for the last one.
    pub distance_to_next: f64,
    /// Degrees true to the following waypoint; 0 for the last one.
    pub bearing_to_next:  f64,
}

impl RoutePoint {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
            distance_to_next: 0.0,
            bearing_to_next:  0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A non-empty waypoint sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    points: Vec<RoutePoint>,
}

impl Route {
    pub fn new(mut points: Vec<RoutePoint>) -> Result<Route> {
        if points.is_empty() {
            return Err(NavError::Route("route has no waypoints".into()));
        }
        if let Some(bad) = points
            .iter()
            .find(|p| !(-90.0..=90.0).contains(&p.latitude) || !(-180.0..=180.0).contains(&p.longitude))
        {
            return Err(NavError::Route(format!(
                "waypoint {:?} out of range ({}, {})",
                bad.name, bad.latitude, bad.longitude
            )));
        }

        for i in 0..points.len() {
            let (distance, bearing) = match points.get(i + 1) {
                Some(next) => {
                    let leg = haversine(points[i].latitude, points[i].longitude, next.latitude, next.longitude);
                    (leg.distance_km, leg.bearing)
                }
                None => (0.0, 0.0),
            };
            points[i].distance_to_next = distance;
            points[i].bearing_to_next = bearing;
        }
        Ok(Route { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[RoutePoint] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Option<&RoutePoint> {
        self.points.get(index)
    }

    /// Length of the route from waypoint `from` to the end, km.
    pub fn distance_from(&self, from: usize) -> f64 {
        self.points.iter().skip(from).map(|p| p.distance_to_next).sum()
    }
}
