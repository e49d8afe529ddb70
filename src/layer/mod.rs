//! Tiled imagery draped over the terrain.

mod surface_tile_renderer;
mod texture;
mod tiled_image_layer;

pub use self::{
    surface_tile_renderer::{
        texture_matrix, transform_texture_coordinates, SurfaceTile, SurfaceTileDraw, SurfaceTileRenderer,
    },
    texture::{GpuResource, GpuResourceCache, Texture},
    tiled_image_layer::{texture_key, LayerStatistics, TextureTile, TiledImageLayer, IMAGE_DETAIL_HINT_ORIGIN},
};
