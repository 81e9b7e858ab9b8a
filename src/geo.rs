//! Great-circle helpers used by the ranking engine.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in decimal degrees.
///
/// `(0.0, 0.0)` is the "unknown" marker: upstream sources emit zeroes when
/// they have no coordinates, and no event in this domain sits in the Gulf of Guinea.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// False for the both-zero marker and for non-finite components.
    ///
    /// A single zero component still counts as known (`(0.0, 11.35)` lies on the
    /// equator). Only the exact `(0.0, 0.0)` sentinel means missing, which is
    /// looser than requiring every component to be non-zero.
    pub fn is_known(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && !(self.latitude == 0.0 && self.longitude == 0.0)
    }

    pub fn known(self) -> Option<Self> {
        self.is_known().then_some(self)
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Haversine distance in kilometers between two points in decimal degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + (d_lon / 2.0).sin().powi(2) * lat1.cos() * lat2.cos();
    // clamp guards sqrt(1 - a) against rounding just above 1.0
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn berlin_to_munich_is_about_504_km() {
        let d = haversine_km(52.5200, 13.4050, 48.1351, 11.5820);
        assert!((d - 504.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn identical_points_are_zero_apart() {
        assert_eq!(haversine_km(46.4983, 11.3548, 46.4983, 11.3548), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeoPoint::new(40.7128, -74.0060);
        let b = GeoPoint::new(34.0522, -118.2437);
        assert!((a.distance_km(&b) - b.distance_km(&a)).abs() < 1e-9);
    }

    #[test]
    fn both_zero_is_unknown() {
        assert!(!GeoPoint::default().is_known());
        assert!(GeoPoint::new(0.0, 11.35).is_known());
        assert!(!GeoPoint::new(f64::NAN, 11.35).is_known());
        assert_eq!(GeoPoint::new(0.0, 0.0).known(), None);
    }
}
