use crate::{
    config::TessellatorConfig,
    terrain::{IndexBuffers, TerrainGeometry, TerrainSharedGeometry, TerrainTile, TerrainTileFactory, TerrainTileList},
    tile_data::{LevelSet, LruCache, Tile, TileKey},
    util::unique_id,
    view::DrawContext,
};
use bevy::{log::debug, math::DMat4, utils::HashMap};
use std::{
    mem,
    sync::Arc,
    time::{Duration, Instant},
};

/// Added to the detail hint of the tessellator.
/// With the default hint, tiles are subdivided while one of their cells covers more than ten pixels.
pub const TERRAIN_DETAIL_HINT_ORIGIN: f64 = 10.0;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TessellationStatistics {
    /// Tiles tested against the render criteria.
    pub tiles_visited: usize,
    /// Tiles rejected by the view frustum or the horizon.
    pub tiles_culled: usize,
    pub tiles_drawn: usize,
    pub geometry_regenerated: usize,
    pub max_level: u32,
    pub elapsed: Duration,
}

/// Selects the terrain tiles of each frame and keeps their geometry current.
///
/// Top level tiles live as long as the tessellator, finer tiles are kept in an LRU cache
/// between frames together with their extents and vertices.
pub struct Tessellator {
    id: u64,
    level_set: LevelSet,
    detail_hint: f64,
    extent_tolerance: f64,
    index_buffers: IndexBuffers,
    top_level_tiles: Vec<TerrainTile>,
    tile_cache: LruCache<TileKey, TerrainTile>,
    shared_geometry: HashMap<(u32, u32), Arc<TerrainSharedGeometry>>,
    geometry_counter: u64,
}

impl Tessellator {
    pub fn new(config: &TessellatorConfig) -> Self {
        Self {
            id: unique_id(),
            level_set: config.level_set.build(),
            detail_hint: config.detail_hint,
            extent_tolerance: config.extent_tolerance,
            index_buffers: config.index_buffers,
            top_level_tiles: Vec::new(),
            tile_cache: LruCache::new(config.tile_cache.capacity, config.tile_cache.low_water),
            shared_geometry: HashMap::default(),
            geometry_counter: 0,
        }
    }

    pub fn level_set(&self) -> &LevelSet {
        &self.level_set
    }

    pub fn detail_hint(&self) -> f64 {
        self.detail_hint
    }

    pub fn set_detail_hint(&mut self, detail_hint: f64) {
        self.detail_hint = detail_hint;
    }

    pub fn tile_cache(&self) -> &LruCache<TileKey, TerrainTile> {
        &self.tile_cache
    }

    /// The texture coordinates and indices of tiles with the given number of cells.
    pub fn shared_geometry(&mut self, tile_width: u32, tile_height: u32) -> Arc<TerrainSharedGeometry> {
        let index_buffers = self.index_buffers;

        self.shared_geometry
            .entry((tile_width, tile_height))
            .or_insert_with(|| Arc::new(TerrainSharedGeometry::new(tile_width, tile_height, index_buffers)))
            .clone()
    }

    /// Selects the terrain tiles visible from the navigator of the frame.
    ///
    /// Tiles outside of the view frustum or beyond the horizon are culled, so the union of
    /// the returned tiles covers the visible terrain only.
    ///
    /// Every tile of the returned list carries geometry computed for the globe stamp of `dc`.
    pub fn tessellate(&mut self, dc: &DrawContext) -> TerrainTileList {
        let start = Instant::now();
        let mut statistics = TessellationStatistics::default();
        let mut tiles = Vec::new();

        if self.top_level_tiles.is_empty() {
            self.create_top_level_tiles();
        }

        let mut top_level_tiles = mem::take(&mut self.top_level_tiles);

        for tile in &mut top_level_tiles {
            if dc.is_extent_visible(tile.update_extent(dc), self.extent_tolerance) {
                self.add_tile_or_descendants(dc, tile, &mut tiles, &mut statistics);
            } else {
                statistics.tiles_culled += 1;
            }
        }

        self.top_level_tiles = top_level_tiles;

        let sector = tiles
            .iter()
            .map(|tile: &TerrainTile| *tile.sector())
            .reduce(|union, sector| union.union(&sector));

        statistics.tiles_drawn = tiles.len();
        statistics.elapsed = start.elapsed();

        debug!(
            "Tessellated {} tiles up to level {}: visited {}, culled {}, regenerated {} in {:?}.",
            statistics.tiles_drawn,
            statistics.max_level,
            statistics.tiles_visited,
            statistics.tiles_culled,
            statistics.geometry_regenerated,
            statistics.elapsed
        );

        TerrainTileList {
            tiles,
            sector,
            stamp: dc.globe_stamp,
            globe: dc.globe.clone(),
            statistics,
        }
    }

    /// A tile is drawn as is, if it belongs to the last level or is fine enough for its distance to the eye.
    pub fn tile_meets_render_criteria(&self, dc: &DrawContext, tile: &mut Tile) -> bool {
        self.level_set.is_last_level(tile.level_number())
            || !tile.must_subdivide(dc, TERRAIN_DETAIL_HINT_ORIGIN + self.detail_hint)
    }

    /// Computes the vertices of the tile from the current elevations.
    ///
    /// The elevation model may answer with coarser data than the level asks for,
    /// the geometry is then refined again once better data has arrived and the stamp changes.
    pub fn regenerate_tile_geometry(&mut self, dc: &DrawContext, tile: &mut TerrainTile) {
        let (w, h) = (tile.level().tile_width(), tile.level().tile_height());
        let (num_lat, num_lon) = (h as usize + 1, w as usize + 1);
        let sector = *tile.sector();

        let mut elevations = vec![0.0; num_lat * num_lon];
        let resolution = dc.globe.elevation_model().elevations_for_sector(
            &sector,
            num_lat,
            num_lon,
            tile.level().texel_size(),
            dc.vertical_exaggeration,
            &mut elevations,
        );

        let centroid = sector.centroid();
        let center_elevation = elevations[(num_lat / 2) * num_lon + num_lon / 2];
        let reference_center = dc
            .globe
            .compute_point_from_location(centroid, center_elevation);

        let mut points = Vec::with_capacity(num_lat * num_lon);
        dc.globe.compute_points_from_positions(
            &sector,
            num_lat,
            num_lon,
            &elevations,
            reference_center,
            &mut points,
        );

        self.geometry_counter += 1;

        tile.geometry = Some(TerrainGeometry {
            stamp: dc.globe_stamp,
            reference_center,
            transform: DMat4::from_translation(reference_center),
            points: points.into(),
            shared: self.shared_geometry(w, h),
            vertex_buffer_key: format!("terrain_{}_{}_{}", self.id, tile.key(), self.geometry_counter),
            resolution,
        });
    }

    fn create_top_level_tiles(&mut self) {
        let level = self.level_set.first_level();

        self.top_level_tiles = self
            .level_set
            .tiles_at_level(self.level_set.sector(), level)
            .filter_map(|key| Tile::from_key(&self.level_set, key))
            .map(TerrainTile::new)
            .collect();
    }

    fn add_tile_or_descendants(
        &mut self,
        dc: &DrawContext,
        tile: &mut TerrainTile,
        tiles: &mut Vec<TerrainTile>,
        statistics: &mut TessellationStatistics,
    ) {
        statistics.tiles_visited += 1;

        let next_level = self.level_set.level(tile.level_number() + 1);

        let next_level = match next_level {
            Some(next_level) if !self.tile_meets_render_criteria(dc, tile) => next_level,
            _ => {
                self.add_tile(dc, tile, tiles, statistics);
                return;
            }
        };

        let children = tile.subdivide(next_level, &mut self.tile_cache, &TerrainTileFactory);

        for mut child in children {
            if dc.is_extent_visible(child.update_extent(dc), self.extent_tolerance) {
                self.add_tile_or_descendants(dc, &mut child, tiles, statistics);
            } else {
                statistics.tiles_culled += 1;
            }

            let size = child.cache_size();
            self.tile_cache.put(child.key(), child, size);
        }
    }

    fn add_tile(
        &mut self,
        dc: &DrawContext,
        tile: &mut TerrainTile,
        tiles: &mut Vec<TerrainTile>,
        statistics: &mut TessellationStatistics,
    ) {
        if !tile.has_current_geometry(&dc.globe_stamp) {
            self.regenerate_tile_geometry(dc, tile);
            statistics.geometry_regenerated += 1;
        }

        statistics.max_level = statistics.max_level.max(tile.level_number());
        tiles.push(tile.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        math::{Globe, Location, Sector},
        terrain::ZeroElevationModel,
        view::NavigatorState,
    };
    use bevy::math::UVec2;
    use rand::Rng;

    fn globe() -> Arc<Globe> {
        Arc::new(Globe::wgs84(Arc::new(ZeroElevationModel)))
    }

    fn draw_context(globe: &Arc<Globe>, location: Location, altitude: f64, vertical_exaggeration: f64) -> DrawContext {
        let navigator = NavigatorState::above(globe, location, altitude, 0.8, UVec2::new(1024, 768));
        DrawContext::new(globe.clone(), navigator, vertical_exaggeration, 0)
    }

    #[test]
    fn tiles_cover_the_view_without_overlap() {
        let globe = globe();
        let mut tessellator = Tessellator::new(&TessellatorConfig::default());
        let dc = draw_context(&globe, Location::new(45.0, 10.0), 2_000_000.0, 1.0);

        let terrain = tessellator.tessellate(&dc);

        assert!(!terrain.is_empty());
        assert_eq!(terrain.statistics.tiles_drawn, terrain.len());
        assert_eq!(terrain.stamp, dc.globe_stamp);

        for (index, tile) in terrain.iter().enumerate() {
            assert!(tile.has_current_geometry(&dc.globe_stamp));

            for other in &terrain.tiles[index + 1..] {
                assert!(!tile.sector().overlaps(other.sector()), "{} overlaps {}", tile.key(), other.key());
            }
        }

        let sector = terrain.sector.unwrap();
        assert!(sector.contains(45.0, 10.0));
        // the far side of the globe is culled
        assert!(!sector.contains(-45.0, -170.0));
    }

    #[test]
    fn terrain_behind_the_horizon_is_culled() {
        let globe = globe();
        let mut tessellator = Tessellator::new(&TessellatorConfig::default());
        let location = Location::new(45.0, 10.0);
        let terrain = tessellator.tessellate(&draw_context(&globe, location, 2_000_000.0, 1.0));

        let below = globe.surface_normal_at_location(location.latitude, location.longitude);
        let faces_the_eye = |latitude: f64, longitude: f64| {
            globe.surface_normal_at_location(latitude, longitude).dot(below) > 0.0
        };

        assert!(terrain.statistics.tiles_culled > 0);

        for tile in terrain.iter() {
            let sector = tile.sector();
            let centroid = sector.centroid();

            assert!(
                faces_the_eye(centroid.latitude, centroid.longitude)
                    || sector
                        .corners()
                        .iter()
                        .any(|corner| faces_the_eye(corner.latitude, corner.longitude)),
                "{} {} lies on the far side of the globe",
                tile.key(),
                sector
            );
        }

        let sector = terrain.sector.unwrap();
        assert!(sector.min_latitude() > -45.0);
    }

    #[test]
    fn closer_views_use_finer_tiles() {
        let globe = globe();
        let mut tessellator = Tessellator::new(&TessellatorConfig::default());

        let far = tessellator.tessellate(&draw_context(&globe, Location::new(0.0, 0.0), 10_000_000.0, 1.0));
        let near = tessellator.tessellate(&draw_context(&globe, Location::new(0.0, 0.0), 20_000.0, 1.0));

        assert!(near.statistics.max_level > far.statistics.max_level);

        let finest_near = near.min_tile_delta_latitude_in(&Sector::new(-0.1, 0.1, -0.1, 0.1)).unwrap();
        let finest_far = far.min_tile_delta_latitude_in(&Sector::new(-0.1, 0.1, -0.1, 0.1)).unwrap();
        assert!(finest_near < finest_far);
    }

    #[test]
    fn geometry_is_reused_until_the_globe_changes() {
        let globe = globe();
        let mut tessellator = Tessellator::new(&TessellatorConfig::default());

        let dc = draw_context(&globe, Location::new(30.0, -100.0), 1_000_000.0, 1.0);
        let first = tessellator.tessellate(&dc);
        assert_eq!(first.statistics.geometry_regenerated, first.len());

        let second = tessellator.tessellate(&dc);
        assert_eq!(second.len(), first.len());
        assert_eq!(second.statistics.geometry_regenerated, 0);

        let exaggerated = draw_context(&globe, Location::new(30.0, -100.0), 1_000_000.0, 2.0);
        let third = tessellator.tessellate(&exaggerated);
        assert_eq!(third.statistics.geometry_regenerated, third.len());

        let keys = |list: &TerrainTileList| {
            list.iter()
                .filter_map(|tile| tile.geometry.as_ref())
                .map(|geometry| geometry.vertex_buffer_key.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&first), keys(&second));
        assert!(keys(&first)
            .iter()
            .all(|key| !keys(&third).contains(key)));
    }

    #[test]
    fn detail_hint_coarsens_the_terrain() {
        let globe = globe();
        let dc = draw_context(&globe, Location::new(-20.0, 140.0), 500_000.0, 1.0);

        let mut fine = Tessellator::new(&TessellatorConfig::default());
        let mut coarse = Tessellator::new(&TessellatorConfig {
            detail_hint: 40.0,
            ..Default::default()
        });

        assert!(fine.tessellate(&dc).len() > coarse.tessellate(&dc).len());
    }

    #[test]
    fn surface_points_lie_on_the_terrain() {
        let globe = globe();
        let mut tessellator = Tessellator::new(&TessellatorConfig::default());
        let location = Location::new(52.0, 13.0);
        let terrain = tessellator.tessellate(&draw_context(&globe, location, 200_000.0, 1.0));

        let mut rng = rand::rng();

        for _ in 0..100 {
            let latitude = location.latitude + rng.random_range(-0.5..0.5);
            let longitude = location.longitude + rng.random_range(-0.5..0.5);

            let point = terrain.surface_point(latitude, longitude, 0.0).unwrap();
            let expected = globe.compute_point_from_position(latitude, longitude, 0.0);
            // the mesh cuts the ellipsoid between its vertices
            assert!(point.distance(expected) < 100.0);

            let raised = terrain.surface_point(latitude, longitude, 1_000.0).unwrap();
            assert!((raised.distance(point) - 1_000.0).abs() < 1e-6);
        }

        assert!(terrain.surface_point(-52.0, -167.0, 0.0).is_none());
    }

    #[test]
    fn subdivided_tiles_return_to_the_cache() {
        let globe = globe();
        let mut tessellator = Tessellator::new(&TessellatorConfig::default());

        let terrain = tessellator.tessellate(&draw_context(&globe, Location::new(0.0, 0.0), 50_000.0, 1.0));

        assert!(terrain.statistics.max_level > 0);
        assert!(!tessellator.tile_cache().is_empty());
        assert!(terrain
            .iter()
            .filter(|tile| tile.level_number() > 0)
            .all(|tile| tessellator.tile_cache().contains(&tile.key())));
    }
}
