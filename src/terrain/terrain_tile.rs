use crate::{
    math::{Globe, GlobeStamp, Sector},
    terrain::TessellationStatistics,
    tile_data::{Level, Tile, TileFactory},
};
use bevy::math::{DMat4, DVec3, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::{
    mem,
    ops::{Deref, DerefMut},
    sync::Arc,
};

bitflags::bitflags! {
    /// The index buffers built for the shared terrain geometry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct IndexBuffers: u32 {
        const TRIANGLES = 1 << 0;
        const WIREFRAME = 1 << 1;
        const OUTLINE   = 1 << 2;
    }
}

/// Texture coordinates and indices, identical for all terrain tiles of the same dimensions.
///
/// Vertices are laid out row-major from the south west corner, with `tile_width + 1`
/// vertices per row and `tile_height + 1` rows.
#[derive(Clone, Debug, Default)]
pub struct TerrainSharedGeometry {
    pub tile_width: u32,
    pub tile_height: u32,
    pub texture_coordinates: Vec<Vec2>,
    /// Two counter clockwise triangles per cell, seen from above the terrain.
    pub triangle_indices: Vec<u32>,
    /// Line segments along all rows and columns.
    pub wireframe_indices: Vec<u32>,
    /// Line segments along the tile border.
    pub outline_indices: Vec<u32>,
}

impl TerrainSharedGeometry {
    pub fn new(tile_width: u32, tile_height: u32, index_buffers: IndexBuffers) -> Self {
        let (w, h) = (tile_width, tile_height);
        let vertices_per_row = w + 1;
        let index = |row: u32, column: u32| row * vertices_per_row + column;

        let texture_coordinates = (0..=h)
            .flat_map(|row| (0..=w).map(move |column| Vec2::new(column as f32 / w as f32, row as f32 / h as f32)))
            .collect();

        let mut geometry = Self {
            tile_width,
            tile_height,
            texture_coordinates,
            ..Default::default()
        };

        if index_buffers.contains(IndexBuffers::TRIANGLES) {
            geometry.triangle_indices.reserve((6 * w * h) as usize);

            for row in 0..h {
                for column in 0..w {
                    let (sw, se) = (index(row, column), index(row, column + 1));
                    let (nw, ne) = (index(row + 1, column), index(row + 1, column + 1));

                    geometry.triangle_indices.extend([sw, se, nw, se, ne, nw]);
                }
            }
        }

        if index_buffers.contains(IndexBuffers::WIREFRAME) {
            for row in 0..=h {
                for column in 0..w {
                    geometry.wireframe_indices.extend([index(row, column), index(row, column + 1)]);
                }
            }

            for column in 0..=w {
                for row in 0..h {
                    geometry.wireframe_indices.extend([index(row, column), index(row + 1, column)]);
                }
            }
        }

        if index_buffers.contains(IndexBuffers::OUTLINE) {
            let south = (0..w).map(|column| (index(0, column), index(0, column + 1)));
            let east = (0..h).map(|row| (index(row, w), index(row + 1, w)));
            let north = (0..w).rev().map(|column| (index(h, column + 1), index(h, column)));
            let west = (0..h).rev().map(|row| (index(row + 1, 0), index(row, 0)));

            geometry.outline_indices = south
                .chain(east)
                .chain(north)
                .chain(west)
                .flat_map(|(start, end)| [start, end])
                .collect();
        }

        geometry
    }

    pub fn num_vertices(&self) -> usize {
        ((self.tile_width + 1) * (self.tile_height + 1)) as usize
    }
}

/// The vertices of a terrain tile, relative to its reference center.
#[derive(Clone, Debug)]
pub struct TerrainGeometry {
    /// The globe state the vertices were computed for.
    pub stamp: GlobeStamp,
    pub reference_center: DVec3,
    /// Maps the tile local vertices to model coordinates.
    pub transform: DMat4,
    pub points: Arc<[Vec3]>,
    pub shared: Arc<TerrainSharedGeometry>,
    /// Identifies the vertex buffer of these points in the GPU resource cache.
    pub vertex_buffer_key: String,
    /// The resolution in radians of the elevations the vertices were built from.
    pub resolution: f64,
}

impl TerrainGeometry {
    /// The model coordinates of the vertex in the given row and column.
    pub fn point(&self, row: u32, column: u32) -> DVec3 {
        let index = (row * (self.shared.tile_width + 1) + column) as usize;
        self.reference_center + self.points[index].as_dvec3()
    }
}

/// A tile of the terrain mesh.
#[derive(Clone, Debug)]
pub struct TerrainTile {
    tile: Tile,
    pub geometry: Option<TerrainGeometry>,
}

impl Deref for TerrainTile {
    type Target = Tile;

    fn deref(&self) -> &Self::Target {
        &self.tile
    }
}

impl DerefMut for TerrainTile {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tile
    }
}

impl TerrainTile {
    pub fn new(tile: Tile) -> Self {
        Self {
            tile,
            geometry: None,
        }
    }

    /// Whether the tile has vertices computed for the given globe state.
    pub fn has_current_geometry(&self, stamp: &GlobeStamp) -> bool {
        self.geometry
            .as_ref()
            .is_some_and(|geometry| &geometry.stamp == stamp)
    }

    pub fn cache_size(&self) -> usize {
        let points = self
            .geometry
            .as_ref()
            .map_or(0, |geometry| geometry.points.len() * mem::size_of::<Vec3>());

        self.tile.cache_size() + mem::size_of::<Option<TerrainGeometry>>() + points
    }

    /// Interpolates the terrain surface at a location inside the tile.
    pub fn surface_point(&self, latitude: f64, longitude: f64) -> Option<DVec3> {
        let geometry = self.geometry.as_ref()?;
        let sector = self.sector();

        if !sector.contains(latitude, longitude) {
            return None;
        }

        let (w, h) = (geometry.shared.tile_width, geometry.shared.tile_height);

        let s = (longitude - sector.min_longitude()) / sector.delta_longitude() * w as f64;
        let t = (latitude - sector.min_latitude()) / sector.delta_latitude() * h as f64;

        let column = (s.floor() as u32).min(w - 1);
        let row = (t.floor() as u32).min(h - 1);
        let (fs, ft) = (s - column as f64, t - row as f64);

        let south = geometry
            .point(row, column)
            .lerp(geometry.point(row, column + 1), fs);
        let north = geometry
            .point(row + 1, column)
            .lerp(geometry.point(row + 1, column + 1), fs);

        Some(south.lerp(north, ft))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TerrainTileFactory;

impl TileFactory for TerrainTileFactory {
    type Tile = TerrainTile;

    fn create_tile(&self, sector: Sector, level: Level, row: u32, column: u32) -> TerrainTile {
        TerrainTile::new(Tile::new(sector, level, row, column))
    }
}

/// The terrain tiles of one frame, all computed for the same globe state.
#[derive(Clone, Debug)]
pub struct TerrainTileList {
    pub tiles: Vec<TerrainTile>,
    pub sector: Option<Sector>,
    pub stamp: GlobeStamp,
    pub globe: Arc<Globe>,
    pub statistics: TessellationStatistics,
}

impl TerrainTileList {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TerrainTile> {
        self.tiles.iter()
    }

    /// The point on the current terrain at the location, raised by `offset` meters along the surface normal.
    ///
    /// Returns `None`, if no tile of the frame covers the location.
    pub fn surface_point(&self, latitude: f64, longitude: f64, offset: f64) -> Option<DVec3> {
        let point = self
            .tiles
            .iter()
            .filter(|tile| tile.sector().contains(latitude, longitude))
            .max_by_key(|tile| tile.level_number())
            .and_then(|tile| tile.surface_point(latitude, longitude))?;

        Some(point + self.globe.surface_normal_at_location(latitude, longitude) * offset)
    }

    /// The latitude delta in degrees of the finest tiles overlapping the sector.
    pub fn min_tile_delta_latitude_in(&self, sector: &Sector) -> Option<f64> {
        self.tiles
            .iter()
            .filter(|tile| tile.sector().overlaps(sector))
            .map(|tile| tile.level().tile_delta().latitude)
            .min_by(f64::total_cmp)
    }
}
