use crate::{tile_data::Tile, util::suffix_for_mime_type};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Builds the url a tile image is retrieved from.
pub trait UrlBuilder: Send + Sync {
    fn url_for_tile(&self, tile: &Tile, image_format: &str) -> Result<String>;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WmsVersion {
    /// Uses `srs` and a longitude first bounding box.
    #[default]
    V1_1_1,
    /// Uses `crs` and a latitude first bounding box.
    V1_3_0,
}

/// Builds `GetMap` requests of an OGC Web Map Service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WmsUrlBuilder {
    pub service_address: String,
    pub layer_names: String,
    #[serde(default)]
    pub style_names: String,
    #[serde(default)]
    pub version: WmsVersion,
    #[serde(default)]
    pub transparent: bool,
}

impl WmsUrlBuilder {
    pub fn new(service_address: &str, layer_names: &str) -> Self {
        Self {
            service_address: service_address.to_string(),
            layer_names: layer_names.to_string(),
            style_names: String::new(),
            version: WmsVersion::default(),
            transparent: false,
        }
    }

    pub fn with_version(mut self, version: WmsVersion) -> Self {
        self.version = version;
        self
    }
}

impl UrlBuilder for WmsUrlBuilder {
    fn url_for_tile(&self, tile: &Tile, image_format: &str) -> Result<String> {
        ensure!(!self.service_address.is_empty(), "The WMS service address is empty.");
        ensure!(!image_format.is_empty(), "No image format for the WMS request.");

        let sector = tile.sector();
        let level = tile.level();

        let (version, reference_system, bbox) = match self.version {
            WmsVersion::V1_1_1 => (
                "1.1.1",
                "srs",
                [
                    sector.min_longitude(),
                    sector.min_latitude(),
                    sector.max_longitude(),
                    sector.max_latitude(),
                ],
            ),
            WmsVersion::V1_3_0 => (
                "1.3.0",
                "crs",
                [
                    sector.min_latitude(),
                    sector.min_longitude(),
                    sector.max_latitude(),
                    sector.max_longitude(),
                ],
            ),
        };

        let separator = if !self.service_address.contains('?') {
            "?"
        } else if self.service_address.ends_with(['?', '&']) {
            ""
        } else {
            "&"
        };

        let [west_or_south, south_or_west, east_or_north, north_or_east] = bbox;

        Ok(format!(
            "{address}{separator}service=WMS&request=GetMap&version={version}\
             &layers={layers}&styles={styles}&format={image_format}&transparent={transparent}\
             &width={width}&height={height}&{reference_system}=EPSG:4326\
             &bbox={west_or_south},{south_or_west},{east_or_north},{north_or_east}",
            address = self.service_address,
            layers = self.layer_names,
            styles = self.style_names,
            transparent = if self.transparent { "TRUE" } else { "FALSE" },
            width = level.tile_width(),
            height = level.tile_height(),
        ))
    }
}

/// Reads tiles from a local directory laid out like the tile cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileUrlBuilder {
    pub root: PathBuf,
}

impl FileUrlBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl UrlBuilder for FileUrlBuilder {
    fn url_for_tile(&self, tile: &Tile, image_format: &str) -> Result<String> {
        let path = tile.key().path(&self.root, suffix_for_mime_type(image_format));

        Ok(format!("file://{}", path.display()))
    }
}
