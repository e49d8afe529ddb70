use crate::{
    config::TiledImageLayerConfig,
    layer::{GpuResource, GpuResourceCache, SurfaceTile, Texture},
    math::Sector,
    retrieval::{spawn_tile_load, spawn_tile_retrieval, Retriever, UrlBuilder},
    services::RuntimeServices,
    terrain::TerrainTileList,
    tile_data::{AbsentResourceList, Level, LevelSet, LruCache, Tile, TileFactory, TileKey, TileRequests},
    util::{suffix_for_mime_type, unique_id},
    view::DrawContext,
};
use anyhow::Result;
use bevy::log::{debug, warn};
use std::{
    fs, mem,
    ops::{Deref, DerefMut},
    path::PathBuf,
    sync::Arc,
};

/// Added to the detail hint of image layers.
/// With the default hint, tiles are subdivided while one of their texels covers more than 1.1 pixels.
pub const IMAGE_DETAIL_HINT_ORIGIN: f64 = 1.1;

/// The key of a tile texture in the GPU resource cache.
pub fn texture_key(layer_id: u64, key: TileKey) -> String {
    format!("layer_{layer_id}_{key}")
}

/// A tile of an image layer.
#[derive(Clone, Debug)]
pub struct TextureTile {
    tile: Tile,
    texture_key: String,
}

impl Deref for TextureTile {
    type Target = Tile;

    fn deref(&self) -> &Self::Target {
        &self.tile
    }
}

impl DerefMut for TextureTile {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tile
    }
}

impl TextureTile {
    pub fn texture_key(&self) -> &str {
        &self.texture_key
    }

    pub fn cache_size(&self) -> usize {
        self.tile.cache_size() + self.texture_key.len()
    }
}

struct TextureTileFactory {
    layer_id: u64,
}

impl TileFactory for TextureTileFactory {
    type Tile = TextureTile;

    fn create_tile(&self, sector: Sector, level: Level, row: u32, column: u32) -> TextureTile {
        let tile = Tile::new(sector, level, row, column);

        TextureTile {
            texture_key: texture_key(self.layer_id, tile.key()),
            tile,
        }
    }
}

/// Counters of the last frame a layer was assembled for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayerStatistics {
    pub tiles_visited: usize,
    /// Surface tiles drawn with their own texture.
    pub tiles_drawn: usize,
    /// Surface tiles drawn with the texture of an ancestor.
    pub fallbacks_drawn: usize,
    pub retrievals_started: usize,
    pub loads_started: usize,
}

/// A layer of imagery draped over the terrain, tiled in a quad-tree pyramid.
///
/// Every frame the layer walks its own level set against the view and selects the tiles
/// to draw. Missing textures are retrieved into the local cache and decoded in the background,
/// meanwhile the nearest ancestor with a texture is drawn in their place.
pub struct TiledImageLayer {
    id: u64,
    name: String,
    level_set: LevelSet,
    image_format: String,
    cache_root: PathBuf,
    detail_hint: f64,
    opacity: f32,
    enabled: bool,
    url_builder: Arc<dyn UrlBuilder>,
    retriever: Arc<dyn Retriever>,
    services: RuntimeServices,
    gpu_cache: Arc<GpuResourceCache>,
    requests: TileRequests,
    top_level_tiles: Vec<TextureTile>,
    tile_cache: LruCache<TileKey, TextureTile>,
    statistics: LayerStatistics,
}

impl TiledImageLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        level_set: LevelSet,
        image_format: &str,
        cache_root: impl Into<PathBuf>,
        url_builder: Arc<dyn UrlBuilder>,
        retriever: Arc<dyn Retriever>,
        services: RuntimeServices,
        gpu_cache: Arc<GpuResourceCache>,
        tile_cache: LruCache<TileKey, TextureTile>,
        absent: AbsentResourceList,
    ) -> Self {
        let id = unique_id();

        Self {
            id,
            name: name.to_string(),
            level_set,
            image_format: image_format.to_string(),
            cache_root: cache_root.into(),
            detail_hint: 0.0,
            opacity: 1.0,
            enabled: true,
            url_builder,
            retriever,
            requests: TileRequests::new(id, &services.notifications, absent),
            services,
            gpu_cache,
            top_level_tiles: Vec::new(),
            tile_cache,
            statistics: LayerStatistics::default(),
        }
    }

    pub fn from_config(
        config: &TiledImageLayerConfig,
        retriever: Arc<dyn Retriever>,
        services: RuntimeServices,
        gpu_cache: Arc<GpuResourceCache>,
    ) -> Self {
        let mut layer = Self::new(
            &config.name,
            config.level_set.build(),
            &config.image_format,
            &config.cache_path,
            config.source.url_builder(),
            retriever,
            services,
            gpu_cache,
            LruCache::new(config.tile_cache.capacity, config.tile_cache.low_water),
            AbsentResourceList::from_config(&config.absent),
        );

        layer.detail_hint = config.detail_hint;
        layer.opacity = config.opacity;
        layer.enabled = config.enabled;
        layer
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level_set(&self) -> &LevelSet {
        &self.level_set
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn detail_hint(&self) -> f64 {
        self.detail_hint
    }

    pub fn set_detail_hint(&mut self, detail_hint: f64) {
        self.detail_hint = detail_hint;
    }

    pub fn requests(&self) -> &TileRequests {
        &self.requests
    }

    pub fn statistics(&self) -> LayerStatistics {
        self.statistics
    }

    /// Selects the surface tiles to draw onto the terrain of the frame and requests missing textures.
    ///
    /// Never blocks: tiles without a texture are drawn with the texture of their nearest
    /// ancestor, or not at all, until their own texture has been loaded.
    pub fn assemble_tiles(&mut self, dc: &DrawContext, terrain: &TerrainTileList) -> Vec<SurfaceTile> {
        self.statistics = LayerStatistics::default();
        self.process_notifications();

        let mut surface_tiles = Vec::new();

        let Some(terrain_sector) = terrain.sector else {
            return surface_tiles;
        };

        if !self.enabled {
            return surface_tiles;
        }

        if self.top_level_tiles.is_empty() {
            self.create_top_level_tiles();
        }

        let mut top_level_tiles = mem::take(&mut self.top_level_tiles);

        for tile in &mut top_level_tiles {
            if self.is_tile_visible(dc, &terrain_sector, tile) {
                self.add_tile_or_descendants(dc, terrain, &terrain_sector, tile, None, &mut surface_tiles);
            }
        }

        self.top_level_tiles = top_level_tiles;

        debug!(
            "Layer {} drew {} tiles and {} fallbacks, started {} retrievals and {} loads.",
            self.name,
            self.statistics.tiles_drawn,
            self.statistics.fallbacks_drawn,
            self.statistics.retrievals_started,
            self.statistics.loads_started
        );

        surface_tiles
    }

    /// A tile is drawn as is, if it belongs to the last level, is fine enough for its distance
    /// to the eye, or is already as small as the terrain tiles it covers.
    fn tile_meets_render_criteria(&self, dc: &DrawContext, terrain: &TerrainTileList, tile: &mut TextureTile) -> bool {
        if self.level_set.is_last_level(tile.level_number()) {
            return true;
        }

        let finer_than_terrain = terrain
            .min_tile_delta_latitude_in(tile.sector())
            .is_some_and(|delta| tile.level().tile_delta().latitude <= delta);

        finer_than_terrain || !tile.must_subdivide(dc, IMAGE_DETAIL_HINT_ORIGIN + self.detail_hint)
    }

    fn is_tile_visible(&self, dc: &DrawContext, terrain_sector: &Sector, tile: &mut TextureTile) -> bool {
        tile.sector().overlaps(terrain_sector) && dc.is_extent_visible(tile.update_extent(dc), 1.0)
    }

    fn add_tile_or_descendants(
        &mut self,
        dc: &DrawContext,
        terrain: &TerrainTileList,
        terrain_sector: &Sector,
        tile: &mut TextureTile,
        fallback: Option<&SurfaceTile>,
        surface_tiles: &mut Vec<SurfaceTile>,
    ) {
        self.statistics.tiles_visited += 1;

        let texture = self.texture_of(tile);

        // level zero textures are always loaded, they are the fallback of last resort
        if texture.is_none() && tile.level().is_level_zero() {
            self.request_texture(tile);
        }

        let next_level = match self.level_set.level(tile.level_number() + 1) {
            Some(next_level) if !self.tile_meets_render_criteria(dc, terrain, tile) => next_level,
            _ => {
                let drawn = match texture {
                    Some(texture) if !texture.is_failed() => {
                        surface_tiles.push(SurfaceTile::new(*tile.sector(), *tile.sector(), texture));
                        self.statistics.tiles_drawn += 1;
                        true
                    }
                    Some(_) => false,
                    None => {
                        self.request_texture(tile);
                        false
                    }
                };

                if let Some(fallback) = fallback.filter(|_| !drawn) {
                    surface_tiles.push(SurfaceTile::new(
                        *tile.sector(),
                        fallback.texture_sector,
                        fallback.texture.clone(),
                    ));
                    self.statistics.fallbacks_drawn += 1;
                }

                return;
            }
        };

        let own = texture
            .filter(|texture| !texture.is_failed())
            .map(|texture| SurfaceTile::new(*tile.sector(), *tile.sector(), texture));
        let fallback = own.as_ref().or(fallback);

        let factory = TextureTileFactory { layer_id: self.id };
        let children = tile.subdivide(next_level, &mut self.tile_cache, &factory);

        for mut child in children {
            if self.is_tile_visible(dc, terrain_sector, &mut child) {
                self.add_tile_or_descendants(dc, terrain, terrain_sector, &mut child, fallback, surface_tiles);
            }

            let size = child.cache_size();
            self.tile_cache.put(child.key(), child, size);
        }
    }

    fn create_top_level_tiles(&mut self) {
        let level = self.level_set.first_level();
        let factory = TextureTileFactory { layer_id: self.id };

        self.top_level_tiles = self
            .level_set
            .tiles_at_level(self.level_set.sector(), level)
            .map(|key| {
                let sector = self.level_set.tile_sector(&level, key.row, key.column);
                factory.create_tile(sector, level, key.row, key.column)
            })
            .collect();
    }

    /// The cached texture of the tile, failed textures included.
    fn texture_of(&self, tile: &TextureTile) -> Option<Arc<Texture>> {
        self.gpu_cache
            .get(&tile.texture_key)
            .and_then(|resource| resource.as_texture().cloned())
    }

    fn process_notifications(&mut self) {
        for (key, path) in self.requests.process_notifications() {
            self.load_texture(key, path);
        }
    }

    fn request_texture(&mut self, tile: &TextureTile) {
        let key = tile.key();

        if !self.requests.can_request(key) {
            return;
        }

        let path = key.path(&self.cache_root, suffix_for_mime_type(&self.image_format));

        if path.exists() {
            self.load_texture(key, path);
            return;
        }

        // offline, only the local cache is read
        if self.services.is_offline() {
            return;
        }

        let url = match self.url_builder.url_for_tile(tile, &self.image_format) {
            Ok(url) => url,
            Err(error) => {
                warn!("No url for tile {key} of layer {}: {error:#}", self.name);
                self.requests.absent().mark_resource_absent(&key.to_string());
                return;
            }
        };

        if !self.requests.begin_retrieval(key) {
            return;
        }

        if spawn_tile_retrieval(&self.services, self.retriever.clone(), self.id, key, url, path) {
            self.statistics.retrievals_started += 1;
        } else {
            self.requests.abandon(key);
        }
    }

    fn load_texture(&mut self, key: TileKey, path: PathBuf) {
        if !self.requests.begin_load(key) {
            return;
        }

        let gpu_cache = self.gpu_cache.clone();
        let cache_key = texture_key(self.id, key);

        let spawned = spawn_tile_load(&self.services, self.id, key, path, move |path, _| -> Result<()> {
            let texture = fs::read(path)
                .map_err(anyhow::Error::from)
                .and_then(|bytes| Texture::decode(&bytes));

            let (texture, result) = match texture {
                Ok(texture) => (texture, Ok(())),
                Err(error) => (Texture::failed(), Err(error)),
            };

            let resource = GpuResource::Texture(Arc::new(texture));
            let size = resource.size_in_bytes();
            gpu_cache.put(cache_key, resource, size)?;

            result
        });

        if spawned {
            self.statistics.loads_started += 1;
        } else {
            self.requests.abandon(key);
        }
    }
}
