//! Fixed-point coordinate conversions and distance helpers.
//!
//! The container stores geometry as 31-bit fixed-point world coordinates:
//! x maps linearly to longitude, y through an inverse Mercator projection to
//! latitude. Conversions here are allocation-free and exact for the integer
//! domain.

use geo::Point;

/// Earth radius in meters for haversine distance calculations
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Number of addressable cells along one axis (2^31).
const WORLD_SIZE_31: f64 = 2_147_483_648.0;

/// Longitude in degrees for a 31-bit x coordinate.
#[inline]
pub fn longitude_from_x31(x31: i32) -> f64 {
    (x31 as f64 / WORLD_SIZE_31) * 360.0 - 180.0
}

/// Latitude in degrees for a 31-bit y coordinate (inverse Mercator).
#[inline]
pub fn latitude_from_y31(y31: i32) -> f64 {
    let sign = std::f64::consts::PI * (1.0 - 2.0 * (y31 as f64 / WORLD_SIZE_31));
    sign.sinh().atan().to_degrees()
}

/// Decoded point (lon, lat) for a 31-bit coordinate pair.
#[inline]
pub fn point_from_31(x31: i32, y31: i32) -> Point {
    Point::new(longitude_from_x31(x31), latitude_from_y31(y31))
}

/// Great-circle distance in meters between two (lat, lon) pairs.
#[inline]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}
