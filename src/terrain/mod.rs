//! The terrain of the globe: elevation models and the tessellator that turns them into tiled meshes.

mod basic_elevation_model;
mod elevation_image;
mod elevation_model;
mod terrain_tile;
mod tessellator;

pub use self::{
    basic_elevation_model::BasicElevationModel,
    elevation_image::ElevationImage,
    elevation_model::{ElevationModel, ZeroElevationModel, NO_COVERAGE},
    terrain_tile::{
        IndexBuffers, TerrainGeometry, TerrainSharedGeometry, TerrainTile, TerrainTileFactory, TerrainTileList,
    },
    tessellator::{TessellationStatistics, Tessellator, TERRAIN_DETAIL_HINT_ORIGIN},
};
