use crate::tile_data::MemoryCache;
use anyhow::Result;
use bevy::{
    math::Vec3,
    prelude::*,
    render::{
        render_asset::RenderAssetUsages,
        render_resource::{Extent3d, TextureDimension, TextureFormat},
    },
};
use std::{mem, sync::Arc};

/// A decoded tile image in RGBA8, ready to be uploaded.
///
/// Images that failed to decode are kept as failed textures,
/// so that the same bytes are not decoded again while the entry stays cached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    failed: bool,
}

impl Texture {
    /// Decodes a png or jpeg image.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)?.into_rgba8();

        Ok(Self {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
            failed: false,
        })
    }

    pub fn failed() -> Self {
        Self {
            width: 0,
            height: 0,
            pixels: Vec::new(),
            failed: true,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn size_in_bytes(&self) -> usize {
        mem::size_of::<Self>() + self.pixels.len()
    }

    /// Converts the texture into a bevy image asset. Failed textures have no image.
    pub fn to_image(&self) -> Option<Image> {
        if self.failed {
            return None;
        }

        Some(Image::new(
            Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
            TextureDimension::D2,
            self.pixels.clone(),
            TextureFormat::Rgba8UnormSrgb,
            RenderAssetUsages::RENDER_WORLD,
        ))
    }
}

/// A resource held for the GPU, shared by all layers and the terrain.
#[derive(Clone, Debug)]
pub enum GpuResource {
    Texture(Arc<Texture>),
    VertexBuffer(Arc<[Vec3]>),
}

impl GpuResource {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::Texture(texture) => texture.size_in_bytes(),
            Self::VertexBuffer(points) => points.len() * mem::size_of::<Vec3>(),
        }
    }

    pub fn as_texture(&self) -> Option<&Arc<Texture>> {
        match self {
            Self::Texture(texture) => Some(texture),
            Self::VertexBuffer(_) => None,
        }
    }

    pub fn as_vertex_buffer(&self) -> Option<&Arc<[Vec3]>> {
        match self {
            Self::VertexBuffer(points) => Some(points),
            Self::Texture(_) => None,
        }
    }
}

/// Decoded textures and vertex buffers by cache key, bounded by their size in bytes.
pub type GpuResourceCache = MemoryCache<String, GpuResource>;

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn decoding() {
        let texture = Texture::decode(&png(8, 4)).unwrap();

        assert_eq!((texture.width(), texture.height()), (8, 4));
        assert_eq!(&texture.pixels()[..4], &[10, 20, 30, 255]);
        assert!(!texture.is_failed());

        let image = texture.to_image().unwrap();
        assert_eq!((image.width(), image.height()), (8, 4));

        assert!(Texture::decode(b"not an image").is_err());
        assert!(Texture::failed().to_image().is_none());
    }

    #[test]
    fn resources_are_sized() {
        let cache = GpuResourceCache::new(1 << 20, 1 << 19);
        let texture = Arc::new(Texture::decode(&png(16, 16)).unwrap());
        let resource = GpuResource::Texture(texture.clone());

        assert!(resource.size_in_bytes() >= 16 * 16 * 4);
        cache.put("tile".to_string(), resource.clone(), resource.size_in_bytes()).unwrap();

        let cached = cache.get(&"tile".to_string()).unwrap();
        assert!(Arc::ptr_eq(cached.as_texture().unwrap(), &texture));
        assert!(cached.as_vertex_buffer().is_none());
    }
}
