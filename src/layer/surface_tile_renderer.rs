use crate::{
    layer::{GpuResource, GpuResourceCache, Texture},
    math::Sector,
    terrain::TerrainTileList,
};
use bevy::{
    log::warn,
    math::{DMat3, DVec2, DVec3, Vec3},
};
use std::sync::Arc;

/// A textured region of the globe, produced by an image layer for the current frame.
#[derive(Clone, Debug)]
pub struct SurfaceTile {
    /// The region to cover.
    pub sector: Sector,
    /// The region the texture spans, larger than `sector` when an ancestor texture stands in.
    pub texture_sector: Sector,
    pub texture: Arc<Texture>,
}

impl SurfaceTile {
    pub fn new(sector: Sector, texture_sector: Sector, texture: Arc<Texture>) -> Self {
        Self {
            sector,
            texture_sector,
            texture,
        }
    }
}

/// One textured draw of a terrain tile.
#[derive(Clone, Debug)]
pub struct SurfaceTileDraw {
    /// The index of the terrain tile in its [`TerrainTileList`].
    pub terrain_tile: usize,
    pub vertices: Arc<[Vec3]>,
    pub texture: Arc<Texture>,
    /// Maps the texture coordinates of the terrain tile to those of the texture.
    pub texture_matrix: DMat3,
    /// Texels outside of this sector are discarded.
    pub clip: Sector,
    pub opacity: f32,
}

/// The texture matrix from the unit coordinates of `terrain` to the texture spanning `texture`.
///
/// Terrain coordinates grow towards the north east, texture rows are stored from north to south,
/// so the vertical axis is flipped.
pub fn texture_matrix(terrain: &Sector, texture: &Sector) -> DMat3 {
    let scale_s = terrain.delta_longitude() / texture.delta_longitude();
    let scale_t = terrain.delta_latitude() / texture.delta_latitude();
    let offset_s = (terrain.min_longitude() - texture.min_longitude()) / texture.delta_longitude();
    let offset_t = (terrain.min_latitude() - texture.min_latitude()) / texture.delta_latitude();

    DMat3::from_cols(
        DVec3::new(scale_s, 0.0, 0.0),
        DVec3::new(0.0, -scale_t, 0.0),
        DVec3::new(offset_s, 1.0 - offset_t, 1.0),
    )
}

/// Drapes the surface tiles of the layers over the terrain tiles of the frame.
pub struct SurfaceTileRenderer {
    gpu_cache: Arc<GpuResourceCache>,
}

impl SurfaceTileRenderer {
    pub fn new(gpu_cache: Arc<GpuResourceCache>) -> Self {
        Self { gpu_cache }
    }

    /// Produces one draw for every pair of overlapping terrain and surface tiles.
    ///
    /// Vertex buffers of the terrain tiles are added to the GPU resource cache on first use.
    pub fn render(&self, terrain: &TerrainTileList, surface_tiles: &[SurfaceTile], opacity: f32) -> Vec<SurfaceTileDraw> {
        let mut draws = Vec::new();

        for (index, terrain_tile) in terrain.iter().enumerate() {
            let Some(geometry) = &terrain_tile.geometry else {
                continue;
            };

            let mut vertices = None;

            for surface_tile in surface_tiles {
                if !terrain_tile.sector().overlaps(&surface_tile.sector) {
                    continue;
                }

                let Some(clip) = terrain_tile.sector().intersection(&surface_tile.sector) else {
                    continue;
                };

                let vertices = vertices
                    .get_or_insert_with(|| self.vertex_buffer(&geometry.vertex_buffer_key, &geometry.points))
                    .clone();

                draws.push(SurfaceTileDraw {
                    terrain_tile: index,
                    vertices,
                    texture: surface_tile.texture.clone(),
                    texture_matrix: texture_matrix(terrain_tile.sector(), &surface_tile.texture_sector),
                    clip,
                    opacity,
                });
            }
        }

        draws
    }

    fn vertex_buffer(&self, key: &str, points: &Arc<[Vec3]>) -> Arc<[Vec3]> {
        let key = key.to_string();

        if let Some(points) = self
            .gpu_cache
            .get(&key)
            .and_then(|resource| resource.as_vertex_buffer().cloned())
        {
            return points;
        }

        let resource = GpuResource::VertexBuffer(points.clone());
        let size = resource.size_in_bytes();

        if let Err(error) = self.gpu_cache.put(key, resource, size) {
            warn!("Drawing a vertex buffer without caching it: {error:#}");
        }

        points.clone()
    }
}

/// Applies a texture matrix to unit terrain coordinates.
pub fn transform_texture_coordinates(texture_matrix: &DMat3, coordinates: DVec2) -> DVec2 {
    texture_matrix.transform_point2(coordinates)
}
