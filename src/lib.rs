//! This crate provides the core of a virtual globe: an ellipsoidal earth whose terrain is
//! tessellated on demand and draped with tiled imagery, streamed in without ever blocking a frame.
//!
//! # Background
//! A globe is far too large to be held in memory at full resolution. Both the terrain and the
//! imagery are therefore organized as quad-tree pyramids of tiles (see [`tile_data`]),
//! and every frame only the tiles needed for the current view are selected.
//!
//! ## How is the terrain approximated?
//! The [`Tessellator`](terrain::Tessellator) walks its pyramid from the top level tiles down,
//! culls tiles outside of the view frustum and subdivides tiles until their cells appear small
//! enough on screen. The vertices of the selected tiles are computed from the
//! [`ElevationModel`](terrain::ElevationModel) of the globe and kept until the globe changes.
//!
//! ## How is the imagery streamed?
//! Each [`TiledImageLayer`](layer::TiledImageLayer) walks its own pyramid against the same view.
//! Missing tiles are retrieved into a local file cache and decoded on a background task pool
//! (see [`retrieval`] and [`services`]), while the nearest ancestor tile is drawn in their place.
//! Completions are reported back through [`notification`]s and applied on the render thread.

pub mod config;
pub mod layer;
pub mod math;
pub mod notification;
pub mod plugin;
pub mod retrieval;
pub mod scene;
pub mod services;
pub mod terrain;
pub mod tile_data;
pub mod util;
pub mod view;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        config::{GlobeConfig, TiledImageLayerConfig},
        layer::{SurfaceTileDraw, TiledImageLayer},
        math::{Globe, Location, Sector},
        plugin::{GlobePlugin, GlobeView},
        scene::GlobeScene,
        services::RuntimeServices,
        terrain::{BasicElevationModel, ElevationModel, Tessellator},
        view::{DrawContext, NavigatorState},
    };
}
