//! Geometry primitives of the globe: sectors, the ellipsoid, bounding volumes and the view frustum.
//!
//! All vector and matrix types are the double precision [`bevy::math`] types.
//! They are `Copy` values, so every operation returns a new value and never aliases its inputs.

mod bounding_box;
mod frustum;
mod globe;
mod sector;

pub use crate::math::{
    bounding_box::BoundingBox,
    frustum::{Frustum, Plane},
    globe::{Globe, GlobeStamp, WGS84_EQUATORIAL_RADIUS, WGS84_POLAR_RADIUS},
    sector::{Location, Sector},
};

pub(crate) use crate::math::globe::grid_steps;
