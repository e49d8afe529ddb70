use bevy::math::{DMat4, DVec3, DVec4};

/// A plane in Hessian normal form, `normal · p + distance = 0`.
/// Points on the side the normal points to have a positive distance.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub distance: f64,
}

impl Plane {
    /// Creates a normalized plane from the coefficients `(a, b, c, d)` of `ax + by + cz + d = 0`.
    pub fn from_coefficients(coefficients: DVec4) -> Self {
        let length = coefficients.truncate().length();

        Self {
            normal: coefficients.truncate() / length,
            distance: coefficients.w / length,
        }
    }

    pub fn distance_to_point(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }
}

/// The six planes bounding the view volume, with normals pointing inwards.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    /// Extracts the planes of a projection with a depth range of [0, 1].
    /// The order is left, right, bottom, top, near, far.
    pub fn from_clip_from_world(clip_from_world: DMat4) -> Self {
        let rows = [0, 1, 2, 3].map(|i| clip_from_world.row(i));

        Self {
            planes: [
                Plane::from_coefficients(rows[3] + rows[0]),
                Plane::from_coefficients(rows[3] - rows[0]),
                Plane::from_coefficients(rows[3] + rows[1]),
                Plane::from_coefficients(rows[3] - rows[1]),
                Plane::from_coefficients(rows[2]),
                Plane::from_coefficients(rows[3] - rows[2]),
            ],
        }
    }

    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    pub fn intersects_sphere(&self, center: DVec3, radius: f64) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) >= -radius)
    }
}
