use crate::{
    math::{BoundingBox, GlobeStamp, Sector},
    tile_data::{Level, LevelSet, LruCache},
    view::DrawContext,
};
use bevy::math::DVec3;
use std::{
    fmt, mem,
    path::{Path, PathBuf},
};

/// Identifies a tile within its level set.
///
/// Rows and columns count from the south west corner of the global tiling grid.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level_number: u32,
    pub row: u32,
    pub column: u32,
}

impl TileKey {
    pub const fn new(level_number: u32, row: u32, column: u32) -> Self {
        Self {
            level_number,
            row,
            column,
        }
    }

    /// The location of the tile inside a local tile cache, `{root}/{level}/{row}/{row}_{column}.{suffix}`.
    pub fn path<P: AsRef<Path>>(self, cache_root: P, suffix: &str) -> PathBuf {
        cache_root
            .as_ref()
            .join(self.level_number.to_string())
            .join(self.row.to_string())
            .join(format!("{}_{}.{suffix}", self.row, self.column))
    }

    pub fn parent(self) -> Option<Self> {
        (self.level_number > 0).then(|| Self {
            level_number: self.level_number - 1,
            row: self.row / 2,
            column: self.column / 2,
        })
    }

    /// The keys of the children in the order south west, south east, north west, north east.
    pub fn children(self) -> [Self; 4] {
        let level_number = self.level_number + 1;
        let (row, column) = (2 * self.row, 2 * self.column);

        [
            Self::new(level_number, row, column),
            Self::new(level_number, row, column + 1),
            Self::new(level_number, row + 1, column),
            Self::new(level_number, row + 1, column + 1),
        ]
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.level_number, self.row, self.column)
    }
}

/// The corner and center points of a tile in model coordinates.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ReferencePoints {
    /// South west, south east, north west, north east.
    pub corners: [DVec3; 4],
    pub center: DVec3,
}

impl ReferencePoints {
    pub fn iter(&self) -> impl Iterator<Item = DVec3> + '_ {
        self.corners.iter().copied().chain([self.center])
    }
}

/// The quad-tree node shared by terrain, texture and elevation tiles.
///
/// Reference points and extent are computed lazily and remember the [`GlobeStamp`]
/// they were computed for. They are recomputed once the stamp of the frame differs.
#[derive(Clone, Debug)]
pub struct Tile {
    sector: Sector,
    level: Level,
    row: u32,
    column: u32,
    reference_points: Option<(GlobeStamp, ReferencePoints)>,
    extent: Option<(GlobeStamp, BoundingBox)>,
}

impl Tile {
    pub fn new(sector: Sector, level: Level, row: u32, column: u32) -> Self {
        Self {
            sector,
            level,
            row,
            column,
            reference_points: None,
            extent: None,
        }
    }

    /// Creates the tile with the given key, if its level exists.
    pub fn from_key(level_set: &LevelSet, key: TileKey) -> Option<Self> {
        let level = level_set.level(key.level_number)?;
        let sector = level_set.tile_sector(&level, key.row, key.column);

        Some(Self::new(sector, level, key.row, key.column))
    }

    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn level_number(&self) -> u32 {
        self.level.level_number()
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn key(&self) -> TileKey {
        TileKey::new(self.level.level_number(), self.row, self.column)
    }

    /// An estimate of the memory held by the tile itself.
    pub fn cache_size(&self) -> usize {
        mem::size_of::<Self>()
    }

    pub fn reference_points(&self) -> Option<&ReferencePoints> {
        self.reference_points.as_ref().map(|(_, points)| points)
    }

    pub fn extent(&self) -> Option<&BoundingBox> {
        self.extent.as_ref().map(|(_, extent)| extent)
    }

    /// Recomputes the reference points, if they were computed for a different globe state.
    pub fn update_reference_points(&mut self, dc: &DrawContext) -> &ReferencePoints {
        if self.reference_points.as_ref().is_some_and(|(stamp, _)| *stamp != dc.globe_stamp) {
            self.reference_points = None;
        }

        let sector = self.sector;

        &self
            .reference_points
            .get_or_insert_with(|| (dc.globe_stamp, compute_reference_points(dc, &sector)))
            .1
    }

    /// Recomputes the extent, if it was computed for a different globe state.
    pub fn update_extent(&mut self, dc: &DrawContext) -> &BoundingBox {
        if self.extent.as_ref().is_some_and(|(stamp, _)| *stamp != dc.globe_stamp) {
            self.extent = None;
        }

        let sector = self.sector;

        &self
            .extent
            .get_or_insert_with(|| (dc.globe_stamp, compute_extent(dc, &sector)))
            .1
    }

    /// Whether the texels of this tile appear larger on screen than `detail_factor` pixels.
    ///
    /// The texel size on the ground is compared with the size of a pixel at the distance
    /// of the reference point closest to the eye.
    pub fn must_subdivide(&mut self, dc: &DrawContext, detail_factor: f64) -> bool {
        let eye_point = dc.navigator.eye_point();

        let min_distance = self
            .update_reference_points(dc)
            .iter()
            .map(|point| point.distance(eye_point))
            .fold(f64::MAX, f64::min);

        let cell_size = self.level.texel_size() * dc.globe.equatorial_radius();
        let pixel_size = dc.navigator.pixel_size_at_distance(min_distance);

        cell_size > pixel_size * detail_factor
    }

    /// Returns the four children of the tile, in the order south west, south east, north west, north east.
    ///
    /// Children found in the cache are taken out of it and keep their computed state,
    /// the others are created by the factory. Callers put the children back once they are done with them.
    pub fn subdivide<F: TileFactory>(
        &self,
        next_level: Level,
        cache: &mut LruCache<TileKey, F::Tile>,
        factory: &F,
    ) -> [F::Tile; 4] {
        let sectors = self.sector.subdivide();
        let keys = self.key().children();

        std::array::from_fn(|index| {
            let key = keys[index];

            cache
                .remove(&key)
                .unwrap_or_else(|| factory.create_tile(sectors[index], next_level, key.row, key.column))
        })
    }
}

fn compute_reference_points(dc: &DrawContext, sector: &Sector) -> ReferencePoints {
    let globe = &dc.globe;

    let point_at = |latitude: f64, longitude: f64| {
        let elevation = globe.elevation_for_location(latitude, longitude) * dc.vertical_exaggeration;
        globe.compute_point_from_position(latitude, longitude, elevation)
    };

    let centroid = sector.centroid();

    ReferencePoints {
        corners: sector.corners().map(|corner| point_at(corner.latitude, corner.longitude)),
        center: point_at(centroid.latitude, centroid.longitude),
    }
}

fn compute_extent(dc: &DrawContext, sector: &Sector) -> BoundingBox {
    let (min_elevation, max_elevation) = dc.globe.min_and_max_elevations_for_sector(sector);
    let min = min_elevation * dc.vertical_exaggeration;
    let max = max_elevation * dc.vertical_exaggeration;

    BoundingBox::from_sector(&dc.globe, sector, min.min(max), min.max(max))
}

/// Creates the concrete tiles of a layer, elevation model or tessellator.
pub trait TileFactory {
    type Tile;

    fn create_tile(&self, sector: Sector, level: Level, row: u32, column: u32) -> Self::Tile;
}
