//! Geographic primitives: points in degrees, great-circle distances and the
//! Earth-centred projection used as a feature space for partitioning.

use std::f64::consts::{FRAC_PI_2, PI};

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
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

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }

    /// Returns `(latitude, longitude)` in radians.
    pub fn to_radians(&self) -> (f64, f64) {
        (self.latitude.to_radians(), self.longitude.to_radians())
    }
}

impl From<[f64; 2]> for GeoPoint {
    fn from([latitude, longitude]: [f64; 2]) -> Self {
        Self::new(latitude, longitude)
    }
}

/// Checks every point, reporting the first one out of range.
pub fn validate(points: &[GeoPoint]) -> Result<()> {
    match points.iter().position(|p| !p.is_valid()) {
        Some(index) => Err(Error::InvalidCoordinate {
            index,
            latitude: points[index].latitude,
            longitude: points[index].longitude,
        }),
        None => Ok(()),
    }
}

/// Great-circle distance in kilometers (haversine formula).
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (lat1, lon1) = a.to_radians();
    let (lat2, lon2) = b.to_radians();
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Projects `(latitude, longitude)` pairs given in radians onto Earth-radius
/// scaled Cartesian coordinates, one row per point.
///
/// This is only a feature space for Euclidean clustering: over a city-sized
/// area chord lengths are a close stand-in for surface distances.
pub fn project(radians: &[(f64, f64)]) -> Result<Array2<f64>> {
    let mut out = Array2::zeros((radians.len(), 3));
    for (index, (&(lat, lon), mut row)) in radians.iter().zip(out.rows_mut()).enumerate() {
        if !lat.is_finite() || !lon.is_finite() || lat.abs() > FRAC_PI_2 || lon.abs() > PI {
            return Err(Error::InvalidCoordinate {
                index,
                latitude: lat.to_degrees(),
                longitude: lon.to_degrees(),
            });
        }
        row[0] = EARTH_RADIUS_KM * lat.cos() * lon.cos();
        row[1] = EARTH_RADIUS_KM * lat.cos() * lon.sin();
        row[2] = EARTH_RADIUS_KM * lat.sin();
    }
    Ok(out)
}

/// Converts degrees to radians and projects.
pub fn project_points(points: &[GeoPoint]) -> Result<Array2<f64>> {
    let radians: Vec<(f64, f64)> = points.iter().map(GeoPoint::to_radians).collect();
    project(&radians)
}

#[cfg(test)]
mod test {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_haversine_same_point() {
        let p = GeoPoint::new(38.8993106, -76.9937824);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_known_value() {
        // London to Paris is roughly 344 km
        let london = GeoPoint::new(51.5074, -0.1278);
        let paris = GeoPoint::new(48.8566, 2.3522);
        assert!(approx_eq(haversine_distance(&london, &paris), 343.6, 5.0));
        assert_eq!(
            haversine_distance(&london, &paris),
            haversine_distance(&paris, &london)
        );
    }

    #[test]
    fn test_project_on_sphere() {
        let projected = project_points(&[
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(90.0, 0.0),
            GeoPoint::new(38.9, -77.0),
        ])
        .unwrap();
        assert!(approx_eq(projected[[0, 0]], EARTH_RADIUS_KM, 1e-9));
        assert!(approx_eq(projected[[1, 2]], EARTH_RADIUS_KM, 1e-9));
        for row in projected.rows() {
            assert!(approx_eq(row.dot(&row).sqrt(), EARTH_RADIUS_KM, 1e-6));
        }
    }

    #[test]
    fn test_projection_tracks_surface_distance() {
        let a = GeoPoint::new(38.8993106, -76.9937824);
        let b = GeoPoint::new(38.8554358, -76.9951151);
        let projected = project_points(&[a, b]).unwrap();
        let diff = &projected.row(0) - &projected.row(1);
        let chord = diff.dot(&diff).sqrt();
        assert!(approx_eq(chord, haversine_distance(&a, &b), 1e-3));
    }

    #[test]
    fn test_project_rejects_out_of_range() {
        let err = project(&[(0.1, 0.2), (2.0, 0.0)]).unwrap_err();
        match err {
            Error::InvalidCoordinate { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(project(&[(0.0, f64::NAN)]).is_err());
    }

    #[test]
    fn test_validate_degrees() {
        assert!(validate(&[GeoPoint::new(38.9, -77.0)]).is_ok());
        assert!(validate(&[GeoPoint::new(38.9, -77.0), GeoPoint::new(91.0, 0.0)]).is_err());
        assert!(validate(&[GeoPoint::new(0.0, 180.5)]).is_err());
    }
}
