//! The quad-tree tile pyramid shared by the tessellator, the image layers and the elevation models,
//! together with the caches and the request bookkeeping used to fill it asynchronously.

mod absent;
mod cache;
mod level;
mod requests;
mod tile;

pub use self::{
    absent::AbsentResourceList,
    cache::{CacheListener, ListenerId, LruCache, MemoryCache},
    level::{compute_column, compute_last_column, compute_last_row, compute_row, Level, LevelSet, MAX_LEVELS},
    requests::TileRequests,
    tile::{ReferencePoints, Tile, TileFactory, TileKey},
};
