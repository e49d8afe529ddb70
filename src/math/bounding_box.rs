use crate::math::{Frustum, Globe, Sector};
use bevy::math::DVec3;
use itertools::iproduct;

/// An oriented bounding box around a sector of the globe, between a minimum and maximum elevation.
///
/// The box axes follow the local east, north and up frame at the sector centroid,
/// which keeps the box tight for small sectors.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingBox {
    center: DVec3,
    axes: [DVec3; 3],
    half_lengths: DVec3,
}

impl BoundingBox {
    pub fn from_sector(globe: &Globe, sector: &Sector, min_elevation: f64, max_elevation: f64) -> Self {
        let centroid = sector.centroid();
        let axes = globe.local_frame_at_location(centroid.latitude, centroid.longitude);
        let origin = globe.compute_point_from_location(centroid, 0.0);

        let latitudes = [sector.min_latitude(), centroid.latitude, sector.max_latitude()];
        let longitudes = [sector.min_longitude(), centroid.longitude, sector.max_longitude()];

        let mut min = DVec3::MAX;
        let mut max = DVec3::MIN;

        for (latitude, longitude, elevation) in iproduct!(latitudes, longitudes, [min_elevation, max_elevation]) {
            let offset = globe.compute_point_from_position(latitude, longitude, elevation) - origin;
            let local = DVec3::new(offset.dot(axes[0]), offset.dot(axes[1]), offset.dot(axes[2]));

            min = min.min(local);
            max = max.max(local);
        }

        let mid = 0.5 * (min + max);

        Self {
            center: origin + axes[0] * mid.x + axes[1] * mid.y + axes[2] * mid.z,
            axes,
            half_lengths: 0.5 * (max - min),
        }
    }

    pub fn center(&self) -> DVec3 {
        self.center
    }

    /// The radius of the sphere enclosing the box.
    pub fn radius(&self) -> f64 {
        self.half_lengths.length()
    }

    pub fn axes(&self) -> &[DVec3; 3] {
        &self.axes
    }

    pub fn half_lengths(&self) -> DVec3 {
        self.half_lengths
    }

    /// The distance from the point to the enclosing sphere, zero if the point lies inside.
    pub fn distance_to(&self, point: DVec3) -> f64 {
        (self.center.distance(point) - self.radius()).max(0.0)
    }

    /// Tests the box against the frustum planes.
    ///
    /// The projected extent of the box on each plane normal is scaled by `tolerance`,
    /// so values above one keep boxes that only touch the frustum near its boundary.
    pub fn intersects_frustum(&self, frustum: &Frustum, tolerance: f64) -> bool {
        frustum.planes().iter().all(|plane| {
            let effective_radius = self
                .axes
                .iter()
                .zip(self.half_lengths.to_array())
                .map(|(axis, half_length)| plane.normal.dot(*axis).abs() * half_length)
                .sum::<f64>();

            plane.distance_to_point(self.center) + effective_radius * tolerance >= 0.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::ZeroElevationModel;
    use bevy::math::DMat4;
    use std::sync::Arc;

    #[test]
    fn box_contains_sector_samples() {
        let globe = Globe::wgs84(Arc::new(ZeroElevationModel));
        let sector = Sector::new(10.0, 12.0, 20.0, 23.0);
        let bounds = BoundingBox::from_sector(&globe, &sector, -100.0, 2000.0);

        for (latitude, longitude) in iproduct!([10.0, 10.5, 12.0], [20.0, 22.0, 23.0]) {
            let point = globe.compute_point_from_position(latitude, longitude, 1000.0);
            let local = point - bounds.center();

            for (axis, half_length) in bounds.axes().iter().zip(bounds.half_lengths().to_array()) {
                assert!(local.dot(*axis).abs() <= half_length * 1.01 + 1.0);
            }
        }
    }

    #[test]
    fn frustum_culling_with_tolerance() {
        let globe = Globe::wgs84(Arc::new(ZeroElevationModel));
        let eye = globe.compute_point_from_position(0.0, 0.0, 1_000_000.0);
        let view = DMat4::look_at_rh(eye, DVec3::ZERO, DVec3::Y);
        let projection = DMat4::perspective_rh(0.5, 1.0, 1000.0, 1.0e8);
        let frustum = Frustum::from_clip_from_world(projection * view);

        let below = BoundingBox::from_sector(&globe, &Sector::new(-1.0, 1.0, -1.0, 1.0), 0.0, 0.0);
        let beside = BoundingBox::from_sector(&globe, &Sector::new(-1.0, 1.0, 89.0, 91.0), 0.0, 0.0);

        assert!(below.intersects_frustum(&frustum, 1.0));
        assert!(!beside.intersects_frustum(&frustum, 1.0));
        assert!(!beside.intersects_frustum(&frustum, 1.5));
    }
}
