use crate::{
    config::ElevationModelConfig,
    math::{grid_steps, Sector},
    notification::Outcome,
    retrieval::{spawn_tile_retrieval, Retriever, UrlBuilder},
    services::{CancellationToken, RuntimeServices},
    terrain::{ElevationImage, ElevationModel, NO_COVERAGE},
    tile_data::{AbsentResourceList, Level, LevelSet, MemoryCache, Tile, TileKey, TileRequests},
    util::{lock, suffix_for_mime_type, unique_id},
};
use anyhow::Result;
use bevy::{
    log::{debug, warn},
    tasks::{futures_lite::future, Task},
};
use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

struct LoadingImage {
    key: TileKey,
    task: Task<Result<ElevationImage>>,
}

struct ElevationRequests {
    requests: TileRequests,
    loading: Vec<LoadingImage>,
}

/// A tiled elevation model backed by rasters retrieved into a local file cache.
///
/// Queries use the best rasters currently decoded and request the missing ones.
/// Decoded rasters are applied in [`ElevationModel::begin_frame`], which also advances
/// the timestamp of the model, so that terrain built from coarser data is regenerated.
pub struct BasicElevationModel {
    id: u64,
    level_set: LevelSet,
    image_format: String,
    cache_root: PathBuf,
    min_elevation: f64,
    max_elevation: f64,
    url_builder: Arc<dyn UrlBuilder>,
    retriever: Arc<dyn Retriever>,
    services: RuntimeServices,
    images: MemoryCache<TileKey, Arc<ElevationImage>>,
    state: Mutex<ElevationRequests>,
    timestamp: AtomicU64,
}

impl BasicElevationModel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        level_set: LevelSet,
        image_format: &str,
        cache_root: impl Into<PathBuf>,
        min_elevation: f64,
        max_elevation: f64,
        url_builder: Arc<dyn UrlBuilder>,
        retriever: Arc<dyn Retriever>,
        services: RuntimeServices,
        images: MemoryCache<TileKey, Arc<ElevationImage>>,
        absent: AbsentResourceList,
    ) -> Self {
        let id = unique_id();

        Self {
            id,
            level_set,
            image_format: image_format.to_string(),
            cache_root: cache_root.into(),
            min_elevation,
            max_elevation,
            url_builder,
            retriever,
            state: Mutex::new(ElevationRequests {
                requests: TileRequests::new(id, &services.notifications, absent),
                loading: Vec::new(),
            }),
            services,
            images,
            timestamp: AtomicU64::new(0),
        }
    }

    pub fn from_config(
        config: &ElevationModelConfig,
        retriever: Arc<dyn Retriever>,
        services: RuntimeServices,
    ) -> Self {
        Self::new(
            config.level_set.build(),
            &config.image_format,
            &config.cache_path,
            config.min_elevation,
            config.max_elevation,
            config.source.url_builder(),
            retriever,
            services,
            MemoryCache::new(config.image_cache.capacity, config.image_cache.low_water),
            AbsentResourceList::from_config(&config.absent),
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn level_set(&self) -> &LevelSet {
        &self.level_set
    }

    pub fn coverage(&self) -> &Sector {
        self.level_set.sector()
    }

    pub fn images(&self) -> &MemoryCache<TileKey, Arc<ElevationImage>> {
        &self.images
    }

    /// The number of rasters being retrieved or decoded.
    pub fn pending(&self) -> usize {
        let state = lock(&self.state);
        state.requests.num_retrieving() + state.requests.num_loading()
    }

    /// The finest decoded raster covering the location, starting the search at `level`.
    fn best_image_at(&self, level: Level, latitude: f64, longitude: f64) -> Option<(Level, Arc<ElevationImage>)> {
        (0..=level.level_number()).rev().find_map(|level_number| {
            let level = self.level_set.level(level_number)?;
            let key = self.level_set.tile_key_for_location(&level, latitude, longitude);

            self.images.get(&key).map(|image| (level, image))
        })
    }

    /// Requests the raster of the tile, unless it is decoded, pending or absent.
    fn request_image(&self, state: &mut ElevationRequests, key: TileKey) {
        if self.images.contains(&key) || !state.requests.can_request(key) {
            return;
        }

        let path = key.path(&self.cache_root, suffix_for_mime_type(&self.image_format));

        if path.exists() {
            self.load_image(state, key, path);
            return;
        }

        if self.services.is_offline() {
            return;
        }

        let Some(tile) = Tile::from_key(&self.level_set, key) else {
            return;
        };

        let url = match self.url_builder.url_for_tile(&tile, &self.image_format) {
            Ok(url) => url,
            Err(error) => {
                warn!("No url for elevation tile {key}: {error:#}");
                state.requests.absent().mark_resource_absent(&key.to_string());
                return;
            }
        };

        if state.requests.begin_retrieval(key)
            && !spawn_tile_retrieval(&self.services, self.retriever.clone(), self.id, key, url, path)
        {
            state.requests.abandon(key);
        }
    }

    fn load_image(&self, state: &mut ElevationRequests, key: TileKey, path: PathBuf) {
        let Some(tile) = Tile::from_key(&self.level_set, key) else {
            return;
        };

        if !state.requests.begin_load(key) {
            return;
        }

        let image_format = self.image_format.clone();
        let (width, height) = (tile.level().tile_width(), tile.level().tile_height());
        let sector = *tile.sector();

        let task = self
            .services
            .scheduler
            .try_spawn(CancellationToken::new(), move |_: &CancellationToken| -> Result<ElevationImage> {
                let bytes = fs::read(&path)?;
                ElevationImage::decode(&bytes, &image_format, width, height, sector)
            });

        match task {
            Some(task) => state.loading.push(LoadingImage { key, task }),
            None => state.requests.abandon(key),
        }
    }
}

impl ElevationModel for BasicElevationModel {
    fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Acquire)
    }

    fn min_elevation(&self) -> f64 {
        self.min_elevation
    }

    fn max_elevation(&self) -> f64 {
        self.max_elevation
    }

    fn elevation_for_location(&self, latitude: f64, longitude: f64) -> f64 {
        if !self.coverage().contains(latitude, longitude) {
            return 0.0;
        }

        self.best_image_at(self.level_set.last_level(), latitude, longitude)
            .map_or(0.0, |(_, image)| image.sample(latitude, longitude))
    }

    fn elevations_for_sector(
        &self,
        sector: &Sector,
        num_lat: usize,
        num_lon: usize,
        target_resolution: f64,
        vertical_exaggeration: f64,
        result: &mut [f64],
    ) -> f64 {
        let Some(covered) = sector.intersection(self.coverage()) else {
            return NO_COVERAGE;
        };

        let level = self.level_set.level_for_texel_size(target_resolution);

        // Rasters used for this sector, the finest available for every tile of the target level.
        let mut images: Vec<(Level, Arc<ElevationImage>)> = Vec::new();

        {
            let mut state = lock(&self.state);

            for key in self.level_set.tiles_at_level(&covered, level) {
                if !self.images.contains(&key) {
                    self.request_image(&mut state, key);
                }

                let center = self
                    .level_set
                    .tile_sector(&level, key.row, key.column)
                    .centroid();

                if let Some(found) = self.best_image_at(level, center.latitude, center.longitude) {
                    if !images.iter().any(|(_, image)| Arc::ptr_eq(image, &found.1)) {
                        images.push(found);
                    }
                }
            }
        }

        let fallback = self.level_set.first_level().texel_size();
        let mut achieved_resolution: f64 = 0.0;

        for (i, latitude) in grid_steps(sector.min_latitude(), sector.max_latitude(), num_lat).enumerate() {
            for (j, longitude) in grid_steps(sector.min_longitude(), sector.max_longitude(), num_lon).enumerate() {
                if !self.coverage().contains(latitude, longitude) {
                    continue;
                }

                let Some(value) = result.get_mut(i * num_lon + j) else {
                    continue;
                };

                // prefer the finest raster containing the sample
                let image = images
                    .iter()
                    .filter(|(_, image)| image.sector().contains(latitude, longitude))
                    .max_by_key(|(level, _)| level.level_number());

                match image {
                    Some((level, image)) => {
                        *value = image.sample(latitude, longitude) * vertical_exaggeration;
                        achieved_resolution = achieved_resolution.max(level.texel_size());
                    }
                    None => {
                        *value = 0.0;
                        achieved_resolution = achieved_resolution.max(fallback);
                    }
                }
            }
        }

        achieved_resolution
    }

    fn min_and_max_elevations_for_sector(&self, sector: &Sector) -> (f64, f64) {
        let Some(covered) = sector.intersection(self.coverage()) else {
            return (0.0, 0.0);
        };

        let first_level = self.level_set.first_level();
        let mut extremes = (f64::MAX, f64::MIN);

        for key in self.level_set.tiles_at_level(&covered, first_level) {
            let Some(image) = self.images.get(&key) else {
                return (self.min_elevation, self.max_elevation);
            };

            extremes.0 = extremes.0.min(image.min_elevation());
            extremes.1 = extremes.1.max(image.max_elevation());
        }

        if extremes.0 > extremes.1 {
            (self.min_elevation, self.max_elevation)
        } else {
            extremes
        }
    }

    fn begin_frame(&self) {
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        for (key, path) in state.requests.process_notifications() {
            self.load_image(state, key, path);
        }

        let mut changed = false;

        state.loading.retain_mut(|loading| {
            future::block_on(future::poll_once(&mut loading.task)).map_or(true, |image| {
                let image = image.and_then(|image| {
                    let size = image.size_in_bytes();
                    self.images.put(loading.key, Arc::new(image), size)
                });

                let outcome = match image {
                    Ok(()) => {
                        changed = true;
                        Outcome::Success
                    }
                    Err(error) => {
                        warn!("Failed to load elevation tile {}: {error:#}", loading.key);
                        Outcome::Failure(error.to_string())
                    }
                };

                state.requests.finish_load(loading.key, &outcome);
                false
            })
        });

        if changed {
            let timestamp = self.timestamp.fetch_add(1, Ordering::AcqRel) + 1;
            debug!("Elevation model {} advanced to timestamp {timestamp}.", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        math::Location,
        retrieval::{FileRetriever, FileUrlBuilder},
    };
    use std::{
        env, thread,
        time::{Duration, Instant},
    };

    /// A tile whose elevation equals `base` plus one meter per column.
    fn tile_bytes(base: i16, size: u32) -> Vec<u8> {
        (0..size)
            .flat_map(|_| (0..size).map(move |column| base + column as i16))
            .flat_map(i16::to_le_bytes)
            .collect()
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("bevy_globe_elevation_{name}_{}_{}", std::process::id(), unique_id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    struct Fixture {
        model: BasicElevationModel,
        services: RuntimeServices,
        source: PathBuf,
        cache: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            fs::remove_dir_all(&self.source).ok();
            fs::remove_dir_all(&self.cache).ok();
        }
    }

    /// A model covering 0° to 10° in both directions, with two levels of 5 x 5 samples per tile.
    fn fixture() -> Fixture {
        let source = temp_dir("source");
        let cache = temp_dir("cache");
        let level_set = LevelSet::new(Sector::new(0.0, 10.0, 0.0, 10.0), Location::new(10.0, 10.0), 2, 5, 5);

        for key in level_set.tiles_for_sector(level_set.sector(), 1) {
            let path = key.path(&source, "bil");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, tile_bytes(100 * (key.level_number as i16 + 1), 5)).unwrap();
        }

        let services = RuntimeServices::default();
        let model = BasicElevationModel::new(
            level_set,
            "application/bil16",
            &cache,
            -10.0,
            500.0,
            Arc::new(FileUrlBuilder::new(&source)),
            Arc::new(FileRetriever),
            services.clone(),
            MemoryCache::new(1 << 20, 1 << 19),
            AbsentResourceList::default(),
        );

        Fixture {
            model,
            services,
            source,
            cache,
        }
    }

    fn wait_for_data(model: &BasicElevationModel, timestamp: u64) {
        let start = Instant::now();

        while model.timestamp() <= timestamp || model.pending() > 0 {
            assert!(start.elapsed() < Duration::from_secs(10), "elevation data did not arrive");
            model.begin_frame();
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn sectors_outside_coverage_are_untouched() {
        let fixture = fixture();
        let mut result = [42.0; 9];

        let resolution = fixture.model.elevations_for_sector(
            &Sector::new(20.0, 30.0, 20.0, 30.0),
            3,
            3,
            0.001,
            1.0,
            &mut result,
        );

        assert_eq!(resolution, NO_COVERAGE);
        assert_eq!(result, [42.0; 9]);
        assert_eq!(fixture.model.pending(), 0);
    }

    #[test]
    fn missing_data_falls_back_and_loads_asynchronously() {
        let fixture = fixture();
        let model = &fixture.model;
        let sector = Sector::new(0.0, 5.0, 0.0, 5.0);
        let fine = model.level_set().last_level();
        let mut result = [f64::NAN; 4];

        let resolution = model.elevations_for_sector(&sector, 2, 2, fine.texel_size(), 1.0, &mut result);

        assert_eq!(resolution, model.level_set().first_level().texel_size());
        assert_eq!(result, [0.0; 4]);
        assert_eq!(model.pending(), 1);

        wait_for_data(model, 0);

        let resolution = model.elevations_for_sector(&sector, 2, 2, fine.texel_size(), 2.0, &mut result);

        // level one tiles hold 200 m plus one meter per column, a tile spans 5° in four columns
        assert_eq!(resolution, fine.texel_size());
        assert_eq!(result, [400.0, 408.0, 400.0, 408.0]);
        assert_eq!(model.elevation_for_location(2.5, 2.5), 202.0);
        assert!(fixture.cache.join("1/18/18_36.bil").exists());
    }

    #[test]
    fn coarser_data_is_used_while_finer_data_is_missing() {
        let fixture = fixture();
        let model = &fixture.model;
        let sector = Sector::new(0.0, 10.0, 0.0, 10.0);
        let coarse = model.level_set().first_level();
        let fine = model.level_set().last_level();
        let mut result = [0.0; 9];

        model.elevations_for_sector(&sector, 3, 3, coarse.texel_size(), 1.0, &mut result);
        wait_for_data(model, 0);

        let timestamp = model.timestamp();
        let resolution = model.elevations_for_sector(&sector, 3, 3, fine.texel_size(), 1.0, &mut result);

        assert_eq!(resolution, coarse.texel_size());
        assert_eq!(result, [100.0, 102.0, 104.0, 100.0, 102.0, 104.0, 100.0, 102.0, 104.0]);
        assert_eq!(model.min_and_max_elevations_for_sector(&sector), (100.0, 104.0));

        wait_for_data(model, timestamp);
        assert!(model.timestamp() > timestamp);
    }

    #[test]
    fn offline_models_do_not_retrieve() {
        let fixture = fixture();
        let model = &fixture.model;
        let sector = Sector::new(0.0, 5.0, 0.0, 5.0);
        let mut result = [f64::NAN; 4];

        fixture.services.set_offline(true);

        for _ in 0..5 {
            model.begin_frame();
            model.elevations_for_sector(&sector, 2, 2, model.level_set().first_level().texel_size(), 1.0, &mut result);
            assert_eq!(model.pending(), 0);
        }

        assert_eq!(result, [0.0; 4]);
        assert!(!fixture.cache.join("0/9/9_18.bil").exists());

        fixture.services.set_offline(false);
        model.elevations_for_sector(&sector, 2, 2, model.level_set().first_level().texel_size(), 1.0, &mut result);
        assert_eq!(model.pending(), 1);

        wait_for_data(model, 0);
    }
}
