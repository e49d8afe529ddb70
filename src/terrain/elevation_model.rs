use crate::math::Sector;

/// Returned by [`ElevationModel::elevations_for_sector`], if the model does not cover the sector at all.
pub const NO_COVERAGE: f64 = f64::MAX;

/// Supplies elevations to the globe and the tessellator.
///
/// Models are shared between the render thread and worker tasks.
/// Queries never block: a model answers with the best data it currently has
/// and loads better data in the background.
pub trait ElevationModel: Send + Sync {
    /// Changes whenever data that affects the answers of the model becomes available.
    fn timestamp(&self) -> u64;

    fn min_elevation(&self) -> f64;

    fn max_elevation(&self) -> f64;

    /// The elevation in meters at the location, from the best currently available data.
    fn elevation_for_location(&self, latitude: f64, longitude: f64) -> f64;

    /// Fills `result` with a `num_lat` x `num_lon` grid of elevations across the sector,
    /// row-major from south to north and west to east, edges included,
    /// each multiplied by the vertical exaggeration.
    ///
    /// Returns the resolution in radians of the data actually used, which may be coarser
    /// than `target_resolution`. Returns [`NO_COVERAGE`] and leaves `result` untouched,
    /// if the model does not cover the sector.
    fn elevations_for_sector(
        &self,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        target_resolution: f64,
        vertical_exaggeration: f64,
        result: &mut [f64],
    ) -> f64;

    /// Bounds of the elevations inside the sector, not multiplied by any exaggeration.
    fn min_and_max_elevations_for_sector(&self, sector: &Sector) -> (f64, f64);

    /// Applies the data that finished loading since the last frame.
    /// Called once per frame on the render thread, before the frame's globe stamp is taken.
    fn begin_frame(&self) {}
}

/// A model of a perfectly smooth globe.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroElevationModel;

impl ElevationModel for ZeroElevationModel {
    fn timestamp(&self) -> u64 {
        0
    }

    fn min_elevation(&self) -> f64 {
        0.0
    }

    fn max_elevation(&self) -> f64 {
        0.0
    }

    fn elevation_for_location(&self, _latitude: f64, _longitude: f64) -> f64 {
        0.0
    }

    fn elevations_for_sector(
        &self,
        _sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        _target_resolution: f64,
        _vertical_exaggeration: f64,
        result: &mut [f64],
    ) -> f64 {
        let count = (num_lat * num_lon).min(result.len());
        result[..count].fill(0.0);

        0.0
    }

    fn min_and_max_elevations_for_sector(&self, _sector: &Sector) -> (f64, f64) {
        (0.0, 0.0)
    }
}
