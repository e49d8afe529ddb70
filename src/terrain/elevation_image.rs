use crate::math::Sector;
use anyhow::{bail, ensure, Result};
use bytemuck::pod_collect_to_vec;
use ndarray::Array2;
use std::{io::Cursor, mem};
use tiff::decoder::{Decoder, DecodingResult};

/// A decoded elevation raster covering the sector of its tile.
///
/// Rows run from north to south and columns from west to east, the first and last
/// row and column lie exactly on the sector edges.
#[derive(Clone, Debug)]
pub struct ElevationImage {
    sector: Sector,
    data: Array2<f32>,
    min_elevation: f32,
    max_elevation: f32,
}

impl ElevationImage {
    /// # Panics
    /// Panics if the raster has less than two rows or columns.
    pub fn new(sector: Sector, data: Array2<f32>) -> Self {
        assert!(
            data.nrows() >= 2 && data.ncols() >= 2,
            "An elevation raster needs at least 2 x 2 samples."
        );

        let (min_elevation, max_elevation) = data
            .iter()
            .fold((f32::MAX, f32::MIN), |(min, max), &value| (min.min(value), max.max(value)));

        Self {
            sector,
            data,
            min_elevation,
            max_elevation,
        }
    }

    /// Decodes the bytes of an elevation tile of the given mime type.
    pub fn decode(bytes: &[u8], image_format: &str, width: u32, height: u32, sector: Sector) -> Result<Self> {
        match image_format {
            "application/bil16" | "application/bil" => Self::from_bil16(bytes, width, height, sector),
            "image/tiff" => Self::from_tiff(bytes, sector),
            _ => bail!("Unsupported elevation format {image_format}."),
        }
    }

    /// Decodes a raw grid of little endian 16 bit integers.
    pub fn from_bil16(bytes: &[u8], width: u32, height: u32, sector: Sector) -> Result<Self> {
        let (width, height) = (width as usize, height as usize);

        ensure!(
            bytes.len() == width * height * mem::size_of::<i16>(),
            "Expected {} bytes for a {width} x {height} bil16 tile, got {}.",
            width * height * mem::size_of::<i16>(),
            bytes.len()
        );
        ensure!(width >= 2 && height >= 2, "Invalid bil16 tile size {width} x {height}.");

        let samples: Vec<i16> = pod_collect_to_vec(bytes);
        let data: Vec<f32> = samples
            .into_iter()
            .map(|sample| i16::from_le(sample) as f32)
            .collect();

        Ok(Self::new(sector, Array2::from_shape_vec((height, width), data)?))
    }

    pub fn from_tiff(bytes: &[u8], sector: Sector) -> Result<Self> {
        let mut decoder = Decoder::new(Cursor::new(bytes))?;
        let (width, height) = decoder.dimensions()?;
        let (width, height) = (width as usize, height as usize);

        ensure!(width >= 2 && height >= 2, "Invalid tiff tile size {width} x {height}.");

        let data: Vec<f32> = match decoder.read_image()? {
            DecodingResult::I16(data) => data.into_iter().map(f32::from).collect(),
            DecodingResult::U16(data) => data.into_iter().map(f32::from).collect(),
            DecodingResult::I32(data) => data.into_iter().map(|value| value as f32).collect(),
            DecodingResult::F32(data) => data,
            DecodingResult::F64(data) => data.into_iter().map(|value| value as f32).collect(),
            _ => bail!("Unsupported tiff sample type."),
        };

        Ok(Self::new(sector, Array2::from_shape_vec((height, width), data)?))
    }

    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn min_elevation(&self) -> f64 {
        self.min_elevation as f64
    }

    pub fn max_elevation(&self) -> f64 {
        self.max_elevation as f64
    }

    pub fn size_in_bytes(&self) -> usize {
        mem::size_of::<Self>() + self.data.len() * mem::size_of::<f32>()
    }

    /// Bilinearly interpolates the elevation at the location, which is clamped to the sector.
    pub fn sample(&self, latitude: f64, longitude: f64) -> f64 {
        let sector = &self.sector;
        let (max_x, max_y) = ((self.width() - 1) as f64, (self.height() - 1) as f64);

        let s = ((longitude - sector.min_longitude()) / sector.delta_longitude()).clamp(0.0, 1.0);
        let t = ((sector.max_latitude() - latitude) / sector.delta_latitude()).clamp(0.0, 1.0);

        let (x, y) = (s * max_x, t * max_y);
        let (x0, y0) = (x.floor().min(max_x - 1.0), y.floor().min(max_y - 1.0));
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as usize, y0 as usize);

        let value = |row: usize, column: usize| self.data[[row, column]] as f64;

        let north = value(y0, x0) * (1.0 - fx) + value(y0, x0 + 1) * fx;
        let south = value(y0 + 1, x0) * (1.0 - fx) + value(y0 + 1, x0 + 1) * fx;

        north * (1.0 - fy) + south * fy
    }
}
