//! Configuration of the globe, saved and loaded as RON files.

use crate::{
    math::{Location, Sector, WGS84_EQUATORIAL_RADIUS, WGS84_POLAR_RADIUS},
    retrieval::{FileUrlBuilder, UrlBuilder, WmsUrlBuilder},
    terrain::IndexBuffers,
    tile_data::{LevelSet, MAX_LEVELS},
};
use anyhow::{ensure, Context, Result};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, sync::Arc, time::Duration};

/// The quad-tree pyramid of a tessellator, layer or elevation model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelSetConfig {
    pub sector: Sector,
    pub level_zero_delta: Location,
    pub num_levels: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl Default for LevelSetConfig {
    fn default() -> Self {
        Self {
            sector: Sector::full_sphere(),
            level_zero_delta: Location::new(36.0, 36.0),
            num_levels: 5,
            tile_width: 256,
            tile_height: 256,
        }
    }
}

impl LevelSetConfig {
    /// Checks the values [`LevelSet::new`] would panic on.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=MAX_LEVELS).contains(&self.num_levels),
            "num_levels must be between 1 and {MAX_LEVELS}, not {}",
            self.num_levels
        );
        ensure!(
            self.level_zero_delta.latitude > 0.0 && self.level_zero_delta.longitude > 0.0,
            "level_zero_delta must be positive, not {}",
            self.level_zero_delta
        );
        ensure!(
            self.tile_width > 0 && self.tile_height > 0,
            "invalid tile size {} x {}",
            self.tile_width,
            self.tile_height
        );

        Ok(())
    }

    /// # Panics
    /// Panics if the config does not [`validate`](Self::validate).
    pub fn build(&self) -> LevelSet {
        LevelSet::new(
            self.sector,
            self.level_zero_delta,
            self.num_levels,
            self.tile_width,
            self.tile_height,
        )
    }
}

/// The capacity and low water mark of a cache, in bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub low_water: usize,
}

impl CacheConfig {
    pub const fn new(capacity: usize, low_water: usize) -> Self {
        Self {
            capacity,
            low_water,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TessellatorConfig {
    pub level_set: LevelSetConfig,
    /// Added to the detail factor of the tessellator.
    /// Tiles are subdivided while one of their cells covers more pixels than the factor, larger values give coarser terrain.
    pub detail_hint: f64,
    /// Scales the extent of a tile before it is tested against the view frustum.
    /// Values above one keep tiles close to the frustum edges.
    pub extent_tolerance: f64,
    pub tile_cache: CacheConfig,
    pub index_buffers: IndexBuffers,
}

impl Default for TessellatorConfig {
    fn default() -> Self {
        Self {
            level_set: LevelSetConfig {
                level_zero_delta: Location::new(45.0, 45.0),
                num_levels: 15,
                tile_width: 32,
                tile_height: 32,
                ..default()
            },
            detail_hint: 0.0,
            extent_tolerance: 1.05,
            tile_cache: CacheConfig::new(5_000_000, 4_000_000),
            index_buffers: IndexBuffers::all(),
        }
    }
}

/// The background task scheduler and the offline switch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub worker_threads: usize,
    /// Submissions beyond this number of queued and running tasks are refused.
    pub max_in_flight: usize,
    pub offline: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            max_in_flight: 64,
            offline: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbsentResourceConfig {
    pub max_tries: u32,
    pub min_check_interval: Duration,
    pub try_again_interval: Duration,
}

impl Default for AbsentResourceConfig {
    fn default() -> Self {
        Self {
            max_tries: 3,
            min_check_interval: Duration::from_secs(10),
            try_again_interval: Duration::from_secs(60),
        }
    }
}

/// Where the tiles of a layer or elevation model are retrieved from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TileSource {
    Wms(WmsUrlBuilder),
    Directory(FileUrlBuilder),
}

impl TileSource {
    pub fn url_builder(&self) -> Arc<dyn UrlBuilder> {
        match self {
            Self::Wms(builder) => Arc::new(builder.clone()),
            Self::Directory(builder) => Arc::new(builder.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TiledImageLayerConfig {
    pub name: String,
    pub level_set: LevelSetConfig,
    /// The mime type requested from the source, e.g. `image/png`.
    pub image_format: String,
    /// The directory of the local tile cache.
    pub cache_path: PathBuf,
    pub source: TileSource,
    #[serde(default)]
    pub detail_hint: f64,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_layer_tile_cache")]
    pub tile_cache: CacheConfig,
    #[serde(default)]
    pub absent: AbsentResourceConfig,
}

fn default_opacity() -> f32 {
    1.0
}

fn default_enabled() -> bool {
    true
}

fn default_layer_tile_cache() -> CacheConfig {
    CacheConfig::new(500_000, 400_000)
}

fn default_image_cache() -> CacheConfig {
    CacheConfig::new(20_000_000, 17_000_000)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElevationModelConfig {
    pub level_set: LevelSetConfig,
    /// `application/bil16` or `image/tiff`.
    pub image_format: String,
    pub cache_path: PathBuf,
    pub source: TileSource,
    pub min_elevation: f64,
    pub max_elevation: f64,
    #[serde(default = "default_image_cache")]
    pub image_cache: CacheConfig,
    #[serde(default)]
    pub absent: AbsentResourceConfig,
}

/// Everything needed to set up a globe scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Resource)]
#[serde(default)]
pub struct GlobeConfig {
    pub equatorial_radius: f64,
    pub polar_radius: f64,
    pub vertical_exaggeration: f64,
    pub tessellator: TessellatorConfig,
    pub retrieval: RetrievalConfig,
    /// The cache of decoded textures and vertex buffers.
    pub gpu_cache: CacheConfig,
    pub elevation_model: Option<ElevationModelConfig>,
    pub layers: Vec<TiledImageLayerConfig>,
}

impl Default for GlobeConfig {
    fn default() -> Self {
        Self {
            equatorial_radius: WGS84_EQUATORIAL_RADIUS,
            polar_radius: WGS84_POLAR_RADIUS,
            vertical_exaggeration: 1.0,
            tessellator: default(),
            retrieval: default(),
            gpu_cache: CacheConfig::new(150_000_000, 100_000_000),
            elevation_model: None,
            layers: default(),
        }
    }
}

impl GlobeConfig {
    pub fn add_layer(&mut self, layer: TiledImageLayerConfig) -> &mut Self {
        self.layers.push(layer);
        self
    }

    /// Loads the config and checks every level set in it.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let encoded = fs::read_to_string(path)?;
        let config: Self = ron::from_str(&encoded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.tessellator.level_set.validate().context("tessellator")?;

        if let Some(elevation_model) = &self.elevation_model {
            elevation_model.level_set.validate().context("elevation model")?;
        }

        for layer in &self.layers {
            layer
                .level_set
                .validate()
                .with_context(|| format!("layer {}", layer.name))?;
        }

        Ok(())
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let encoded = ron::ser::to_string_pretty(self, default())?;
        Ok(fs::write(path, encoded)?)
    }
}
