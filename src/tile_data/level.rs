use crate::{
    math::{Location, Sector},
    tile_data::TileKey,
};
use itertools::iproduct;

/// The origin of the global tiling grid, rows and columns count from the south west corner of the globe.
const TILE_ORIGIN: Location = Location::new(-90.0, -180.0);

/// The deepest pyramid a level set may describe, rows and columns of finer levels overflow.
pub const MAX_LEVELS: u32 = 24;

/// One resolution step of a [`LevelSet`].
///
/// A level is a plain value. It does not refer back to its level set, which owns all its levels.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Level {
    level_number: u32,
    tile_delta: Location,
    texel_size: f64,
    tile_width: u32,
    tile_height: u32,
}

impl Level {
    fn new(level_number: u32, tile_delta: Location, tile_width: u32, tile_height: u32) -> Self {
        Self {
            level_number,
            tile_delta,
            texel_size: tile_delta.latitude.to_radians() / tile_height as f64,
            tile_width,
            tile_height,
        }
    }

    pub fn level_number(&self) -> u32 {
        self.level_number
    }

    /// The angular size of a tile of this level in degrees.
    pub fn tile_delta(&self) -> Location {
        self.tile_delta
    }

    /// The angular size of a single texel (or elevation cell) in radians.
    pub fn texel_size(&self) -> f64 {
        self.texel_size
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    pub fn is_level_zero(&self) -> bool {
        self.level_number == 0
    }
}

/// A quad-tree pyramid of tile resolutions covering a sector.
///
/// The tile delta of level `n` is the level zero delta divided by `2^n`.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelSet {
    sector: Sector,
    level_zero_delta: Location,
    levels: Vec<Level>,
    tile_width: u32,
    tile_height: u32,
    num_level_zero_columns: u32,
}

impl LevelSet {
    /// # Panics
    /// Panics if there are no levels or more than [`MAX_LEVELS`], the level zero delta is not positive
    /// or a tile dimension is zero.
    pub fn new(
        sector: Sector,
        level_zero_delta: Location,
        num_levels: u32,
        tile_width: u32,
        tile_height: u32,
    ) -> Self {
        assert!(
            (1..=MAX_LEVELS).contains(&num_levels),
            "A level set needs between 1 and {MAX_LEVELS} levels, not {num_levels}."
        );
        assert!(
            level_zero_delta.latitude > 0.0 && level_zero_delta.longitude > 0.0,
            "Invalid level zero delta {level_zero_delta}."
        );
        assert!(
            tile_width > 0 && tile_height > 0,
            "Invalid tile size {tile_width} x {tile_height}."
        );

        let levels = (0..num_levels)
            .map(|level_number| {
                let scale = (1u64 << level_number) as f64;
                let tile_delta = Location::new(
                    level_zero_delta.latitude / scale,
                    level_zero_delta.longitude / scale,
                );
                Level::new(level_number, tile_delta, tile_width, tile_height)
            })
            .collect();

        let num_level_zero_columns =
            ((sector.delta_longitude() / level_zero_delta.longitude).round() as u32).max(1);

        Self {
            sector,
            level_zero_delta,
            levels,
            tile_width,
            tile_height,
            num_level_zero_columns,
        }
    }

    /// A level set with the default tile size of 256 x 256.
    pub fn with_default_tile_size(sector: Sector, level_zero_delta: Location, num_levels: u32) -> Self {
        Self::new(sector, level_zero_delta, num_levels, 256, 256)
    }

    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    pub fn level_zero_delta(&self) -> Location {
        self.level_zero_delta
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    pub fn num_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn num_level_zero_columns(&self) -> u32 {
        self.num_level_zero_columns
    }

    pub fn level(&self, level_number: u32) -> Option<Level> {
        self.levels.get(level_number as usize).copied()
    }

    pub fn first_level(&self) -> Level {
        self.levels[0]
    }

    pub fn last_level(&self) -> Level {
        self.levels[self.levels.len() - 1]
    }

    pub fn is_last_level(&self, level_number: u32) -> bool {
        level_number + 1 >= self.num_levels()
    }

    /// The coarsest level whose texels are at least as fine as the requested size in radians.
    /// Falls back to the last level if no level is fine enough.
    pub fn level_for_texel_size(&self, texel_size: f64) -> Level {
        self.levels
            .iter()
            .find(|level| level.texel_size <= texel_size)
            .copied()
            .unwrap_or_else(|| self.last_level())
    }

    /// The coarsest level whose tiles are at most as large as the requested latitude delta in degrees.
    /// Falls back to the last level if no level is fine enough.
    pub fn level_for_tile_delta(&self, delta_latitude: f64) -> Level {
        self.levels
            .iter()
            .find(|level| level.tile_delta.latitude <= delta_latitude)
            .copied()
            .unwrap_or_else(|| self.last_level())
    }

    /// The sector of the tile at the given position of the global tiling grid.
    pub fn tile_sector(&self, level: &Level, row: u32, column: u32) -> Sector {
        let delta = level.tile_delta;
        let min_latitude = TILE_ORIGIN.latitude + row as f64 * delta.latitude;
        let min_longitude = TILE_ORIGIN.longitude + column as f64 * delta.longitude;

        Sector::new(
            min_latitude,
            min_latitude + delta.latitude,
            min_longitude,
            min_longitude + delta.longitude,
        )
    }

    /// The key of the tile of the level containing the location.
    pub fn tile_key_for_location(&self, level: &Level, latitude: f64, longitude: f64) -> TileKey {
        let delta = level.tile_delta;

        TileKey::new(
            level.level_number,
            compute_row(delta.latitude, latitude),
            compute_column(delta.longitude, longitude),
        )
    }

    /// The number of tiles of the given level whose sectors intersect the sector.
    pub fn tile_count_for_sector(&self, sector: &Sector, level_number: u32) -> usize {
        self.level(level_number)
            .map_or(0, |level| self.tiles_at_level(sector, level).count())
    }

    /// The number of tiles of all levels up to and including the last level whose sectors intersect the sector.
    pub fn tile_count_through_level(&self, sector: &Sector, last_level: u32) -> usize {
        (0..=last_level.min(self.num_levels() - 1))
            .map(|level_number| self.tile_count_for_sector(sector, level_number))
            .sum()
    }

    /// Enumerates the tiles intersecting the sector, for every level up to and including the last level.
    ///
    /// Tiles are produced level by level, starting at level zero, and row-major within a level.
    /// Only tiles inside the level set sector are reported.
    pub fn tiles_for_sector<'a>(
        &'a self,
        sector: &'a Sector,
        last_level: u32,
    ) -> impl Iterator<Item = TileKey> + 'a {
        let last_level = last_level.min(self.num_levels() - 1) as usize;

        self.levels[..=last_level]
            .iter()
            .flat_map(move |&level| self.tiles_at_level(sector, level))
    }

    /// Enumerates the tiles of a single level intersecting the sector, row-major.
    pub fn tiles_at_level<'a>(&'a self, sector: &Sector, level: Level) -> impl Iterator<Item = TileKey> + 'a {
        let query = sector.intersection(&self.sector);
        let delta = level.tile_delta;

        let (rows, columns) = match query {
            Some(query) => (
                compute_row(delta.latitude, query.min_latitude())
                    ..=compute_last_row(delta.latitude, query.max_latitude()),
                compute_column(delta.longitude, query.min_longitude())
                    ..=compute_last_column(delta.longitude, query.max_longitude()),
            ),
            #[allow(clippy::reversed_empty_ranges)]
            None => (1..=0, 1..=0),
        };

        iproduct!(rows, columns).filter_map(move |(row, column)| {
            let tile_sector = self.tile_sector(&level, row, column);
            let intersects = query.is_some_and(|query| tile_sector.intersects(&query));

            intersects.then(|| TileKey::new(level.level_number, row, column))
        })
    }
}

fn num_rows(delta_latitude: f64) -> u32 {
    (180.0 / delta_latitude).ceil() as u32
}

fn num_columns(delta_longitude: f64) -> u32 {
    (360.0 / delta_longitude).ceil() as u32
}

/// The row of the global tiling grid containing the latitude.
pub fn compute_row(delta_latitude: f64, latitude: f64) -> u32 {
    let row = ((latitude - TILE_ORIGIN.latitude) / delta_latitude).floor();
    row.clamp(0.0, (num_rows(delta_latitude) - 1) as f64) as u32
}

/// The column of the global tiling grid containing the longitude.
pub fn compute_column(delta_longitude: f64, longitude: f64) -> u32 {
    let column = ((longitude - TILE_ORIGIN.longitude) / delta_longitude).floor();
    column.clamp(0.0, (num_columns(delta_longitude) - 1) as f64) as u32
}

/// The last row touched by a sector ending at the latitude.
/// A sector ending exactly on a row boundary does not reach into the next row.
pub fn compute_last_row(delta_latitude: f64, max_latitude: f64) -> u32 {
    let row = ((max_latitude - TILE_ORIGIN.latitude) / delta_latitude).ceil() - 1.0;
    row.clamp(0.0, (num_rows(delta_latitude) - 1) as f64) as u32
}

/// The last column touched by a sector ending at the longitude.
pub fn compute_last_column(delta_longitude: f64, max_longitude: f64) -> u32 {
    let column = ((max_longitude - TILE_ORIGIN.longitude) / delta_longitude).ceil() - 1.0;
    column.clamp(0.0, (num_columns(delta_longitude) - 1) as f64) as u32
}
