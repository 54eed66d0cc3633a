//! Spherical Web-Mercator projection helpers
//!
//! Converts between geographic coordinates (longitude, latitude in degrees)
//! and the planar projected frame used by the grid index and renderer, and
//! scales real-world ellipse axes into projected units.

use std::f64::consts::PI;

/// Earth radius used by spherical Web-Mercator (EPSG:3857), in meters
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Latitude beyond which Web-Mercator is undefined; inputs are clamped here
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Upper bound for the secant scale factor near the poles
pub const MAX_SECANT_SCALE: f64 = 1.0e6;

/// Resolution (meters per pixel) at zoom level 0 for 256px tiles
pub const ZOOM0_RESOLUTION: f64 = 2.0 * PI * EARTH_RADIUS_M / 256.0;

/// Half the width of the projected world, in meters
pub const HALF_WORLD: f64 = PI * EARTH_RADIUS_M;

/// Project longitude/latitude (degrees) to Web-Mercator x/y (meters).
///
/// Latitude is clamped to the Mercator validity band so that pole-adjacent
/// inputs never produce infinities.
pub fn lonlat_to_xy(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = lon.to_radians() * EARTH_RADIUS_M;
    let y = (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * EARTH_RADIUS_M;
    (x, y)
}

/// Inverse of [`lonlat_to_xy`]
pub fn xy_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

/// Local scale factor `1 / cos(lat)` of the projection at `lat` degrees.
pub fn secant_scale(lat: f64) -> f64 {
    let cos = lat.to_radians().cos().abs();
    if cos <= 1.0 / MAX_SECANT_SCALE || !cos.is_finite() {
        return MAX_SECANT_SCALE;
    }
    (1.0 / cos).min(MAX_SECANT_SCALE)
}

/// Convert a length in meters at latitude `lat` to projected-plane units.
///
/// Negative or non-finite lengths collapse to zero.
pub fn meters_to_plane(length_m: f64, lat: f64) -> f64 {
    if !length_m.is_finite() || length_m <= 0.0 {
        return 0.0;
    }
    length_m * secant_scale(lat)
}

/// Convert a bearing (degrees clockwise from true north) to the renderer's
/// angle convention (radians counter-clockwise from the projected +X axis).
pub fn bearing_to_rotation(bearing_deg: f64) -> f64 {
    if !bearing_deg.is_finite() {
        return PI / 2.0;
    }
    (90.0 - bearing_deg).to_radians()
}

/// Fractional zoom level for a resolution in projected units per pixel
pub fn zoom_for_resolution(resolution: f64) -> f64 {
    if !resolution.is_finite() || resolution <= 0.0 {
        return 0.0;
    }
    (ZOOM0_RESOLUTION / resolution).log2()
}
