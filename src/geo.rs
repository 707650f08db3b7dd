//! Great-circle math for consecutive GPS fixes

use crate::models::LocationSample;

/// Mean Earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two coordinates, in kilometers
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Haversine distance between two coordinates, in meters
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine_km(lat1, lon1, lat2, lon2) * 1000.0
}

/// Distance in meters between two samples
pub fn distance_between(from: &LocationSample, to: &LocationSample) -> f64 {
    haversine_m(from.latitude, from.longitude, to.latitude, to.longitude)
}

/// Milliseconds elapsed from `from` to `to` (negative if out of order)
pub fn elapsed_ms(from: &LocationSample, to: &LocationSample) -> i64 {
    (to.timestamp - from.timestamp).num_milliseconds()
}

/// Speed in m/s implied by covering `distance_m` in `elapsed_ms`.
///
/// Returns infinity for a non-positive interval so callers treat it as implausible.
pub fn implied_speed_ms(distance_m: f64, elapsed_ms: i64) -> f64 {
    if elapsed_ms <= 0 {
        return f64::INFINITY;
    }
    distance_m / (elapsed_ms as f64 / 1000.0)
}

/// Convert m/s to km/h
pub fn ms_to_kmh(speed_ms: f64) -> f64 {
    speed_ms * 3.6
}
