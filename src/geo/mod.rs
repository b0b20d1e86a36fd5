use serde::{Deserialize, Serialize};

use crate::models::courier::GeoPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Radius of the pickup and dropoff geofences.
pub const ARRIVAL_RADIUS_M: f64 = 100.0;

pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_M * central_angle
}

pub fn is_near(current_lat: f64, current_lng: f64, target_lat: f64, target_lng: f64) -> bool {
    let current = GeoPoint {
        lat: current_lat,
        lng: current_lng,
    };
    let target = GeoPoint {
        lat: target_lat,
        lng: target_lng,
    };

    haversine_m(&current, &target) <= ARRIVAL_RADIUS_M
}

/// Geofence state for one target, owned by whoever tracks the courier.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ProximityState {
    pub near: bool,
    pub distance_m: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProximityChange {
    Arrived,
    Left,
    Unchanged,
}

/// Folds one position fix into the previous state and reports whether the
/// courier crossed the geofence.
pub fn observe(
    previous: ProximityState,
    current: &GeoPoint,
    target: &GeoPoint,
) -> (ProximityState, ProximityChange) {
    let distance_m = haversine_m(current, target);
    let near = distance_m <= ARRIVAL_RADIUS_M;

    let change = match (previous.near, near) {
        (false, true) => ProximityChange::Arrived,
        (true, false) => ProximityChange::Left,
        _ => ProximityChange::Unchanged,
    };

    (
        ProximityState {
            near,
            distance_m: Some(distance_m),
        },
        change,
    )
}
