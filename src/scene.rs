use crate::{
    config::GlobeConfig,
    layer::{GpuResourceCache, SurfaceTileDraw, SurfaceTileRenderer, TiledImageLayer},
    math::Globe,
    notification::{Notification, REDRAW_EVENT},
    retrieval::Retriever,
    services::RuntimeServices,
    terrain::{BasicElevationModel, ElevationModel, TerrainTileList, Tessellator, ZeroElevationModel},
    view::{DrawContext, NavigatorState},
};
use async_channel::Receiver;
use bevy::{log::info, prelude::*};
use std::sync::Arc;

/// The globe, its terrain and its image layers, drawn once per frame.
#[derive(Resource)]
pub struct GlobeScene {
    globe: Arc<Globe>,
    vertical_exaggeration: f64,
    tessellator: Tessellator,
    layers: Vec<TiledImageLayer>,
    renderer: SurfaceTileRenderer,
    gpu_cache: Arc<GpuResourceCache>,
    services: RuntimeServices,
    redraws: Receiver<Notification>,
    frame_number: u64,
    terrain: Option<TerrainTileList>,
    draws: Vec<SurfaceTileDraw>,
}

impl GlobeScene {
    pub fn new(
        globe: Arc<Globe>,
        tessellator: Tessellator,
        gpu_cache: Arc<GpuResourceCache>,
        services: RuntimeServices,
    ) -> Self {
        Self {
            globe,
            vertical_exaggeration: 1.0,
            tessellator,
            layers: Vec::new(),
            renderer: SurfaceTileRenderer::new(gpu_cache.clone()),
            gpu_cache,
            redraws: services.notifications.subscribe(&[REDRAW_EVENT], None),
            services,
            frame_number: 0,
            terrain: None,
            draws: Vec::new(),
        }
    }

    /// Sets up the globe, its elevation model and its layers, all reading through `retriever`.
    pub fn from_config(config: &GlobeConfig, services: RuntimeServices, retriever: Arc<dyn Retriever>) -> Self {
        let elevation_model: Arc<dyn ElevationModel> = match &config.elevation_model {
            Some(elevation_model) => Arc::new(BasicElevationModel::from_config(
                elevation_model,
                retriever.clone(),
                services.clone(),
            )),
            None => Arc::new(ZeroElevationModel),
        };

        let globe = Arc::new(Globe::new(
            config.equatorial_radius,
            config.polar_radius,
            elevation_model,
        ));
        let gpu_cache = Arc::new(GpuResourceCache::new(
            config.gpu_cache.capacity,
            config.gpu_cache.low_water,
        ));

        let mut scene = Self::new(
            globe,
            Tessellator::new(&config.tessellator),
            gpu_cache.clone(),
            services.clone(),
        );
        scene.vertical_exaggeration = config.vertical_exaggeration;

        for layer in &config.layers {
            info!("Adding layer {} from {}.", layer.name, layer.cache_path.display());

            scene.add_layer(TiledImageLayer::from_config(
                layer,
                retriever.clone(),
                services.clone(),
                gpu_cache.clone(),
            ));
        }

        scene
    }

    pub fn globe(&self) -> &Arc<Globe> {
        &self.globe
    }

    pub fn vertical_exaggeration(&self) -> f64 {
        self.vertical_exaggeration
    }

    pub fn set_vertical_exaggeration(&mut self, vertical_exaggeration: f64) {
        self.vertical_exaggeration = vertical_exaggeration;
    }

    pub fn tessellator(&self) -> &Tessellator {
        &self.tessellator
    }

    pub fn tessellator_mut(&mut self) -> &mut Tessellator {
        &mut self.tessellator
    }

    pub fn add_layer(&mut self, layer: TiledImageLayer) {
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[TiledImageLayer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [TiledImageLayer] {
        &mut self.layers
    }

    pub fn gpu_cache(&self) -> &Arc<GpuResourceCache> {
        &self.gpu_cache
    }

    pub fn services(&self) -> &RuntimeServices {
        &self.services
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// The terrain of the last frame.
    pub fn terrain(&self) -> Option<&TerrainTileList> {
        self.terrain.as_ref()
    }

    /// The surface tile draws of the last frame, in layer order.
    pub fn draws(&self) -> &[SurfaceTileDraw] {
        &self.draws
    }

    /// Whether new data arrived since the last call, so the globe should be drawn again.
    pub fn needs_redraw(&self) -> bool {
        let mut redraw = false;

        while self.redraws.try_recv().is_ok() {
            redraw = true;
        }

        redraw
    }

    /// Draws a frame as seen by the navigator.
    ///
    /// Elevation data that finished loading is applied first, so the whole frame sees one globe state.
    pub fn draw_frame(&mut self, navigator: NavigatorState) -> &[SurfaceTileDraw] {
        self.globe.elevation_model().begin_frame();
        self.frame_number += 1;

        let dc = DrawContext::new(
            self.globe.clone(),
            navigator,
            self.vertical_exaggeration,
            self.frame_number,
        );

        let terrain = self.tessellator.tessellate(&dc);
        let mut draws = Vec::new();

        for layer in &mut self.layers {
            if !layer.is_enabled() {
                continue;
            }

            let surface_tiles = layer.assemble_tiles(&dc, &terrain);
            draws.extend(self.renderer.render(&terrain, &surface_tiles, layer.opacity()));
        }

        self.terrain = Some(terrain);
        self.draws = draws;
        &self.draws
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{CacheConfig, ElevationModelConfig, LevelSetConfig, TileSource},
        math::Location,
        retrieval::{FileRetriever, FileUrlBuilder},
        util::unique_id,
    };
    use bevy::math::UVec2;
    use std::env;

    fn navigator(globe: &Globe) -> NavigatorState {
        NavigatorState::above(globe, Location::new(47.0, 8.0), 1_000_000.0, 0.8, UVec2::new(800, 600))
    }

    #[test]
    fn frames_without_layers() {
        let mut scene = GlobeScene::from_config(&GlobeConfig::default(), RuntimeServices::default(), Arc::new(FileRetriever));
        let navigator = navigator(scene.globe());

        assert!(scene.draw_frame(navigator.clone()).is_empty());
        assert_eq!(scene.frame_number(), 1);

        let terrain = scene.terrain().unwrap();
        assert!(!terrain.is_empty());
        assert!(terrain.sector.unwrap().contains(47.0, 8.0));

        scene.draw_frame(navigator);
        assert_eq!(scene.frame_number(), 2);
        assert_eq!(scene.terrain().unwrap().statistics.geometry_regenerated, 0);
        assert!(!scene.needs_redraw());
    }

    #[test]
    fn missing_elevation_data_keeps_the_globe_smooth() {
        let root = env::temp_dir().join(format!("bevy_globe_scene_{}_{}", std::process::id(), unique_id()));

        let config = GlobeConfig {
            elevation_model: Some(ElevationModelConfig {
                level_set: LevelSetConfig {
                    tile_width: 16,
                    tile_height: 16,
                    ..default()
                },
                image_format: "application/bil16".to_string(),
                cache_path: root.join("cache"),
                source: TileSource::Directory(FileUrlBuilder::new(root.join("missing"))),
                min_elevation: -100.0,
                max_elevation: 100.0,
                image_cache: CacheConfig::new(1 << 20, 1 << 19),
                absent: default(),
            }),
            ..default()
        };

        let mut scene = GlobeScene::from_config(&config, RuntimeServices::default(), Arc::new(FileRetriever));
        let navigator = navigator(scene.globe());

        for _ in 0..3 {
            scene.draw_frame(navigator.clone());
        }

        let terrain = scene.terrain().unwrap();
        let point = terrain.surface_point(47.0, 8.0, 0.0).unwrap();
        let expected = scene.globe().compute_point_from_position(47.0, 8.0, 0.0);
        assert!(point.distance(expected) < 1_000.0);
        assert_eq!(scene.globe().elevation_model().timestamp(), 0);
    }
}
