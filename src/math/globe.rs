use crate::{
    math::{Location, Sector},
    terrain::ElevationModel,
    util::unique_id,
};
use bevy::math::{DVec3, Vec3};
use std::{fmt, sync::Arc};

pub const WGS84_EQUATORIAL_RADIUS: f64 = 6_378_137.0;
pub const WGS84_POLAR_RADIUS: f64 = 6_356_752.314_245;

/// Identifies the globe state some cached geometry was computed for.
///
/// Tiles store the stamp next to their reference points, extents and vertices
/// and recompute them once the stamp of the current frame differs.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GlobeStamp {
    pub globe_id: u64,
    pub elevation_timestamp: u64,
    pub vertical_exaggeration: f64,
}

/// An ellipsoidal globe with an attached elevation model.
///
/// Model coordinates are Y-up: the y axis points to the north pole, the z axis
/// intersects the prime meridian at the equator and the x axis points to 90° east.
pub struct Globe {
    id: u64,
    equatorial_radius: f64,
    polar_radius: f64,
    eccentricity_squared: f64,
    elevation_model: Arc<dyn ElevationModel>,
}

impl fmt::Debug for Globe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Globe")
            .field("id", &self.id)
            .field("equatorial_radius", &self.equatorial_radius)
            .field("polar_radius", &self.polar_radius)
            .finish_non_exhaustive()
    }
}

impl Globe {
    /// # Panics
    /// Panics if the radii are not positive or the polar radius exceeds the equatorial one.
    pub fn new(
        equatorial_radius: f64,
        polar_radius: f64,
        elevation_model: Arc<dyn ElevationModel>,
    ) -> Self {
        assert!(
            equatorial_radius > 0.0 && polar_radius > 0.0 && polar_radius <= equatorial_radius,
            "Invalid globe radii: equatorial {equatorial_radius}, polar {polar_radius}."
        );

        let eccentricity_squared = 1.0 - (polar_radius * polar_radius) / (equatorial_radius * equatorial_radius);

        Self {
            id: unique_id(),
            equatorial_radius,
            polar_radius,
            eccentricity_squared,
            elevation_model,
        }
    }

    pub fn wgs84(elevation_model: Arc<dyn ElevationModel>) -> Self {
        Self::new(WGS84_EQUATORIAL_RADIUS, WGS84_POLAR_RADIUS, elevation_model)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn equatorial_radius(&self) -> f64 {
        self.equatorial_radius
    }

    pub fn polar_radius(&self) -> f64 {
        self.polar_radius
    }

    pub fn eccentricity_squared(&self) -> f64 {
        self.eccentricity_squared
    }

    pub fn elevation_model(&self) -> &Arc<dyn ElevationModel> {
        &self.elevation_model
    }

    /// Captures the current state of the globe for the given vertical exaggeration.
    pub fn stamp(&self, vertical_exaggeration: f64) -> GlobeStamp {
        GlobeStamp {
            globe_id: self.id,
            elevation_timestamp: self.elevation_model.timestamp(),
            vertical_exaggeration,
        }
    }

    pub fn compute_point_from_position(&self, latitude: f64, longitude: f64, altitude: f64) -> DVec3 {
        let (sin_lat, cos_lat) = latitude.to_radians().sin_cos();
        let (sin_lon, cos_lon) = longitude.to_radians().sin_cos();

        // radius of curvature in the prime vertical
        let rpm = self.equatorial_radius / (1.0 - self.eccentricity_squared * sin_lat * sin_lat).sqrt();

        DVec3::new(
            (rpm + altitude) * cos_lat * sin_lon,
            (rpm * (1.0 - self.eccentricity_squared) + altitude) * sin_lat,
            (rpm + altitude) * cos_lat * cos_lon,
        )
    }

    pub fn compute_point_from_location(&self, location: Location, altitude: f64) -> DVec3 {
        self.compute_point_from_position(location.latitude, location.longitude, altitude)
    }

    /// Converts a row-major grid of elevations (south to north, west to east, edges included)
    /// into points relative to the reference center and appends them to `points`.
    ///
    /// # Panics
    /// Panics if `elevations` holds fewer than `num_lat * num_lon` values.
    pub fn compute_points_from_positions(
        &self,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        elevations: &[f64],
        reference_center: DVec3,
        points: &mut Vec<Vec3>,
    ) {
        assert!(
            elevations.len() >= num_lat * num_lon,
            "Elevation grid is smaller than {num_lat} x {num_lon}."
        );

        points.reserve(num_lat * num_lon);

        for (i, latitude) in grid_steps(sector.min_latitude(), sector.max_latitude(), num_lat).enumerate() {
            for (j, longitude) in grid_steps(sector.min_longitude(), sector.max_longitude(), num_lon).enumerate() {
                let point = self.compute_point_from_position(latitude, longitude, elevations[i * num_lon + j]);
                points.push((point - reference_center).as_vec3());
            }
        }
    }

    /// The geodetic surface normal at the location.
    pub fn surface_normal_at_location(&self, latitude: f64, longitude: f64) -> DVec3 {
        let (sin_lat, cos_lat) = latitude.to_radians().sin_cos();
        let (sin_lon, cos_lon) = longitude.to_radians().sin_cos();

        DVec3::new(cos_lat * sin_lon, sin_lat, cos_lat * cos_lon)
    }

    /// The local east, north and up axes at the location.
    pub fn local_frame_at_location(&self, latitude: f64, longitude: f64) -> [DVec3; 3] {
        let (sin_lon, cos_lon) = longitude.to_radians().sin_cos();

        let up = self.surface_normal_at_location(latitude, longitude);
        let east = DVec3::new(cos_lon, 0.0, -sin_lon);
        let north = up.cross(east);

        [east, north, up]
    }

    pub fn elevation_for_location(&self, latitude: f64, longitude: f64) -> f64 {
        self.elevation_model.elevation_for_location(latitude, longitude)
    }

    pub fn min_and_max_elevations_for_sector(&self, sector: &Sector) -> (f64, f64) {
        self.elevation_model.min_and_max_elevations_for_sector(sector)
    }
}

/// Evenly spaced samples from `min` to `max`, both included.
pub(crate) fn grid_steps(min: f64, max: f64, count: usize) -> impl Iterator<Item = f64> {
    let step = if count > 1 {
        (max - min) / (count - 1) as f64
    } else {
        0.0
    };

    (0..count).map(move |i| if i + 1 == count && count > 1 { max } else { min + i as f64 * step })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::ZeroElevationModel;

    fn globe() -> Globe {
        Globe::wgs84(Arc::new(ZeroElevationModel))
    }

    #[test]
    fn axis_convention() {
        let globe = globe();

        let prime_meridian = globe.compute_point_from_position(0.0, 0.0, 0.0);
        assert!((prime_meridian - DVec3::new(0.0, 0.0, WGS84_EQUATORIAL_RADIUS)).length() < 1e-6);

        let east = globe.compute_point_from_position(0.0, 90.0, 0.0);
        assert!((east - DVec3::new(WGS84_EQUATORIAL_RADIUS, 0.0, 0.0)).length() < 1e-6);

        let north_pole = globe.compute_point_from_position(90.0, 0.0, 0.0);
        assert!((north_pole.y - WGS84_POLAR_RADIUS).abs() < 1e-3);
    }

    #[test]
    fn local_frame_is_orthonormal() {
        let globe = globe();

        for (latitude, longitude) in [(0.0, 0.0), (45.0, 120.0), (-60.0, -30.0)] {
            let [east, north, up] = globe.local_frame_at_location(latitude, longitude);

            assert!((east.length() - 1.0).abs() < 1e-12);
            assert!((north.length() - 1.0).abs() < 1e-12);
            assert!(east.dot(north).abs() < 1e-12);
            assert!(east.dot(up).abs() < 1e-12);
            assert!(north.dot(up).abs() < 1e-12);

            // north points towards increasing latitude
            let here = globe.compute_point_from_position(latitude, longitude, 0.0);
            let further_north = globe.compute_point_from_position(latitude + 0.01, longitude, 0.0);
            assert!((further_north - here).dot(north) > 0.0);
        }
    }

    #[test]
    fn points_relative_to_reference_center() {
        let globe = globe();
        let sector = Sector::new(0.0, 1.0, 0.0, 1.0);
        let center = globe.compute_point_from_location(sector.centroid(), 0.0);

        let mut points = Vec::new();
        globe.compute_points_from_positions(&sector, 3, 3, &[0.0; 9], center, &mut points);

        assert_eq!(points.len(), 9);
        assert!(points[4].length() < 1e-3);

        let north_east = globe.compute_point_from_position(1.0, 1.0, 0.0) - center;
        assert!((points[8].as_dvec3() - north_east).length() < 0.05);
    }

    #[test]
    fn grid_steps_include_both_edges() {
        let steps: Vec<_> = grid_steps(-10.0, 10.0, 5).collect();
        assert_eq!(steps, vec![-10.0, -5.0, 0.0, 5.0, 10.0]);
        assert_eq!(grid_steps(3.0, 7.0, 1).collect::<Vec<_>>(), vec![3.0]);
    }
}
