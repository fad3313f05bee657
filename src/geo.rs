use crate::models::session::Coordinate;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two coordinates (haversine).
///
/// Symmetric, zero for identical points. NaN inputs propagate as NaN;
/// callers reject invalid coordinates with [`Coordinate::is_valid`] first.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1 for antipodal points. Comparison keeps NaN.
    let h = if h > 1.0 { 1.0 } else { h };

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Moves a coordinate due north by `meters` along its meridian.
pub fn offset_north(origin: Coordinate, meters: f64) -> Coordinate {
    Coordinate::new(
        origin.latitude + (meters / EARTH_RADIUS_M).to_degrees(),
        origin.longitude,
    )
}
