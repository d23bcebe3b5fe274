//! Great-circle geometry over WGS84 coordinates treated as a sphere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for all distance computations.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A recorded position fix. Immutable once captured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
}

impl GeoPosition {
    pub fn new(latitude: f64, longitude: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            captured_at,
            accuracy_meters: None,
        }
    }

    /// Finite and within latitude/longitude ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Point reached by travelling `distance_km` from here on the initial `bearing_deg`
    /// (0 = north, 90 = east). Keeps this fix's timestamp.
    pub fn destination(&self, bearing_deg: f64, distance_km: f64) -> GeoPosition {
        let delta = distance_km / EARTH_RADIUS_KM;
        let theta = bearing_deg.to_radians();
        let phi1 = self.latitude.to_radians();
        let lambda1 = self.longitude.to_radians();

        let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
        let lambda2 = lambda1
            + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

        let mut longitude = lambda2.to_degrees();
        if longitude > 180.0 {
            longitude -= 360.0;
        } else if longitude < -180.0 {
            longitude += 360.0;
        }

        GeoPosition {
            latitude: phi2.to_degrees(),
            longitude,
            captured_at: self.captured_at,
            accuracy_meters: None,
        }
    }
}

/// Haversine distance between two fixes in kilometres.
///
/// NaN coordinates propagate to a NaN result; callers validate first.
pub fn distance_km(a: &GeoPosition, b: &GeoPosition) -> f64 {
    // Canonical argument order makes the result bit-for-bit symmetric.
    let (a, b) = if (a.latitude, a.longitude) <= (b.latitude, b.longitude) {
        (a, b)
    } else {
        (b, a)
    };

    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Sum of consecutive great-circle legs. Zero for fewer than two points.
pub fn path_distance_km(points: &[GeoPosition]) -> f64 {
    points.windows(2).map(|w| distance_km(&w[0], &w[1])).sum()
}
