use crate::math::{BoundingBox, Frustum, Globe, GlobeStamp, Location};
use bevy::math::{DMat4, DVec3, UVec2};
use std::{sync::Arc, time::Instant};

/// The camera state a frame is drawn with.
#[derive(Clone, Debug)]
pub struct NavigatorState {
    eye_point: DVec3,
    view_from_world: DMat4,
    clip_from_view: DMat4,
    clip_from_world: DMat4,
    frustum: Frustum,
    field_of_view: f64,
    viewport: UVec2,
    pixel_size_scale: f64,
}

impl NavigatorState {
    /// Creates the navigator state for a camera with the given world transform.
    ///
    /// `field_of_view` is the vertical field of view in radians.
    ///
    /// # Panics
    /// Panics if the viewport is empty or the clipping range is invalid.
    pub fn new(
        world_from_view: DMat4,
        field_of_view: f64,
        viewport: UVec2,
        near: f64,
        far: f64,
    ) -> Self {
        assert!(viewport.x > 0 && viewport.y > 0, "Viewport must not be empty.");
        assert!(
            0.0 < near && near < far,
            "Invalid clipping range: near {near}, far {far}."
        );

        let view_from_world = world_from_view.inverse();
        let aspect_ratio = viewport.x as f64 / viewport.y as f64;
        let clip_from_view = DMat4::perspective_rh(field_of_view, aspect_ratio, near, far);
        let clip_from_world = clip_from_view * view_from_world;

        Self {
            eye_point: world_from_view.w_axis.truncate(),
            view_from_world,
            clip_from_view,
            clip_from_world,
            frustum: Frustum::from_clip_from_world(clip_from_world),
            field_of_view,
            viewport,
            pixel_size_scale: 2.0 * (0.5 * field_of_view).tan() / viewport.y as f64,
        }
    }

    pub fn look_at(
        eye: DVec3,
        target: DVec3,
        up: DVec3,
        field_of_view: f64,
        viewport: UVec2,
        near: f64,
        far: f64,
    ) -> Self {
        let view_from_world = DMat4::look_at_rh(eye, target, up);
        Self::new(view_from_world.inverse(), field_of_view, viewport, near, far)
    }

    /// A camera at the given altitude above the location, looking straight down with north up.
    pub fn above(
        globe: &Globe,
        location: Location,
        altitude: f64,
        field_of_view: f64,
        viewport: UVec2,
    ) -> Self {
        let eye = globe.compute_point_from_location(location, altitude);
        let target = globe.compute_point_from_location(location, 0.0);
        let [_, north, _] = globe.local_frame_at_location(location.latitude, location.longitude);

        let near = (0.1 * altitude).max(1.0);
        let far = altitude + 2.0 * globe.equatorial_radius();

        Self::look_at(eye, target, north, field_of_view, viewport, near, far)
    }

    pub fn eye_point(&self) -> DVec3 {
        self.eye_point
    }

    pub fn view_from_world(&self) -> DMat4 {
        self.view_from_world
    }

    pub fn clip_from_view(&self) -> DMat4 {
        self.clip_from_view
    }

    pub fn clip_from_world(&self) -> DMat4 {
        self.clip_from_world
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn field_of_view(&self) -> f64 {
        self.field_of_view
    }

    pub fn viewport(&self) -> UVec2 {
        self.viewport
    }

    /// The size in model units of a screen pixel at the given distance from the eye.
    pub fn pixel_size_at_distance(&self, distance: f64) -> f64 {
        distance.abs() * self.pixel_size_scale
    }
}

/// Everything a frame is drawn with, captured once at the start of the frame.
///
/// The globe stamp is taken when the context is created, so all tiles of a frame
/// are validated against the same globe state even if elevation data arrives mid frame.
#[derive(Clone, Debug)]
pub struct DrawContext {
    pub globe: Arc<Globe>,
    pub navigator: NavigatorState,
    pub vertical_exaggeration: f64,
    pub globe_stamp: GlobeStamp,
    /// Terrain farther from the eye than this lies behind the globe.
    pub horizon_distance: f64,
    pub frame_number: u64,
    pub timestamp: Instant,
}

impl DrawContext {
    pub fn new(
        globe: Arc<Globe>,
        navigator: NavigatorState,
        vertical_exaggeration: f64,
        frame_number: u64,
    ) -> Self {
        let globe_stamp = globe.stamp(vertical_exaggeration);
        let horizon_distance = horizon_distance(&globe, navigator.eye_point(), vertical_exaggeration);

        Self {
            globe,
            navigator,
            vertical_exaggeration,
            globe_stamp,
            horizon_distance,
            frame_number,
            timestamp: Instant::now(),
        }
    }

    /// Whether any part of the extent may be seen: it intersects the view frustum
    /// and does not lie entirely beyond the horizon.
    pub fn is_extent_visible(&self, extent: &BoundingBox, frustum_tolerance: f64) -> bool {
        extent.distance_to(self.navigator.eye_point()) <= self.horizon_distance
            && extent.intersects_frustum(self.navigator.frustum(), frustum_tolerance)
    }
}

/// The distance from the eye to the farthest visible surface point.
///
/// The globe is treated as a sphere with the equatorial radius, the eye altitude is measured
/// from the polar radius, and the highest terrain may rise above the horizon behind it,
/// so the distance never falls short of the one on the ellipsoid.
fn horizon_distance(globe: &Globe, eye_point: DVec3, vertical_exaggeration: f64) -> f64 {
    let radius = globe.equatorial_radius();
    let altitude = eye_point.length() - globe.polar_radius();

    if altitude <= 0.0 {
        return f64::INFINITY;
    }

    let max_elevation = (globe.elevation_model().max_elevation() * vertical_exaggeration).max(0.0);

    (altitude * (2.0 * radius + altitude)).sqrt() + (max_elevation * (2.0 * radius + max_elevation)).sqrt()
}
