//! Spherical geometry helpers
//!
//! Small-area distances use an equirectangular projection around a local
//! origin, which is accurate to well under a meter at running scales.

use crate::sample::LocationSample;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters (haversine)
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Great-circle distance between two samples in meters
pub fn distance_between(a: &LocationSample, b: &LocationSample) -> f64 {
    haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Project lat/lon onto a local east/north plane (meters) around an origin
pub fn latlon_to_meters(lat: f64, lon: f64, origin_lat: f64, origin_lon: f64) -> (f64, f64) {
    let d_lat = (lat - origin_lat).to_radians();
    let d_lon = (lon - origin_lon).to_radians();
    let x = EARTH_RADIUS_M * d_lon * origin_lat.to_radians().cos();
    let y = EARTH_RADIUS_M * d_lat;
    (x, y)
}

/// Distance in meters from `point` to the segment `start` → `end`
///
/// Falls back to point distance when the segment is degenerate, and clamps
/// to the nearest endpoint when the projection falls outside the segment.
pub fn perpendicular_distance(
    point: &LocationSample,
    start: &LocationSample,
    end: &LocationSample,
) -> f64 {
    let (px, py) = latlon_to_meters(point.latitude, point.longitude, start.latitude, start.longitude);
    let (ex, ey) = latlon_to_meters(end.latitude, end.longitude, start.latitude, start.longitude);

    let seg_len_sq = ex * ex + ey * ey;
    if seg_len_sq < 1e-12 {
        return (px * px + py * py).sqrt();
    }

    let t = ((px * ex + py * ey) / seg_len_sq).clamp(0.0, 1.0);
    let dx = px - t * ex;
    let dy = py - t * ey;
    (dx * dx + dy * dy).sqrt()
}
