//! Great-circle distance on a spherical Earth.

use crate::domain::GeoPoint;

/// Mean Earth radius used by the haversine formula, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance in meters between two coordinates given in degrees.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

pub fn distance_between(from: &GeoPoint, to: &GeoPoint) -> f64 {
    haversine_meters(from.latitude, from.longitude, to.latitude, to.longitude)
}

/// Sum of adjacent-pair distances along a route.
pub fn route_distance(route: &[GeoPoint]) -> f64 {
    route
        .windows(2)
        .map(|pair| distance_between(&pair[0], &pair[1]))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn tokyo_station_to_shinjuku() {
        let d = haversine_meters(35.6812, 139.7671, 35.6895, 139.6917);
        assert!((d - 6_876.0).abs() < 50.0, "got {d}");

        // Same computation written out independently.
        let (p1, p2) = (35.6812_f64.to_radians(), 35.6895_f64.to_radians());
        let dp = (35.6895_f64 - 35.6812).to_radians();
        let dl = (139.6917_f64 - 139.7671).to_radians();
        let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
        let expected = 6_371_000.0 * 2.0 * a.sqrt().asin();
        assert!((d - expected).abs() < 1e-6);
    }

    #[test]
    fn identical_points_are_zero_apart() {
        assert_eq!(haversine_meters(51.5, -0.12, 51.5, -0.12), 0.0);
    }

    #[test]
    fn symmetric() {
        let a = haversine_meters(-33.86, 151.21, 40.71, -74.0);
        let b = haversine_meters(40.71, -74.0, -33.86, 151.21);
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn route_distance_of_single_point_is_zero() {
        let p = GeoPoint {
            latitude: 35.0,
            longitude: 139.0,
            captured_at: Utc::now(),
        };
        assert_eq!(route_distance(&[p]), 0.0);
        assert_eq!(route_distance(&[]), 0.0);
    }
}
