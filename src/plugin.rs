use crate::{
    config::GlobeConfig,
    retrieval::FileRetriever,
    scene::GlobeScene,
    services::RuntimeServices,
    view::NavigatorState,
};
use bevy::prelude::*;
use std::sync::Arc;

/// Marks the camera the globe is drawn for.
#[derive(Clone, Copy, Debug, Default, Component)]
pub struct GlobeView;

/// The plugin of the virtual globe.
///
/// Inserts the [`RuntimeServices`] and the [`GlobeScene`] built from the config,
/// and draws a frame of the scene for the first [`GlobeView`] camera at the end of every update.
#[derive(Clone, Default)]
pub struct GlobePlugin {
    pub config: GlobeConfig,
}

impl Plugin for GlobePlugin {
    fn build(&self, app: &mut App) {
        let services = RuntimeServices::new(&self.config.retrieval);
        let scene = GlobeScene::from_config(&self.config, services.clone(), Arc::new(FileRetriever));

        app.insert_resource(self.config.clone())
            .insert_resource(services)
            .insert_resource(scene)
            .add_systems(Last, update_globe_view);
    }
}

/// Builds the navigator state from the globe view camera and draws the frame.
pub fn update_globe_view(
    mut scene: ResMut<GlobeScene>,
    views: Query<(&GlobalTransform, &Projection, &Camera), With<GlobeView>>,
) {
    let Some((transform, projection, camera)) = views.iter().find(|(_, _, camera)| camera.is_active) else {
        return;
    };

    let Projection::Perspective(perspective) = projection else {
        return;
    };

    let Some(viewport) = camera.physical_viewport_size() else {
        return;
    };

    let (near, far) = (perspective.near as f64, perspective.far as f64);

    if viewport.x == 0 || viewport.y == 0 || near <= 0.0 || far <= near {
        return;
    }

    let navigator = NavigatorState::new(
        transform.compute_matrix().as_dmat4(),
        perspective.fov as f64,
        viewport,
        near,
        far,
    );

    scene.draw_frame(navigator);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_inserts_the_scene() {
        let mut app = App::new();
        app.add_plugins(GlobePlugin::default());

        app.world_mut().spawn((GlobeView, GlobalTransform::default()));
        app.update();

        assert!(app.world().contains_resource::<RuntimeServices>());
        assert!(app.world().contains_resource::<GlobeConfig>());

        // the view has no camera, so no frame is drawn
        assert_eq!(app.world().resource::<GlobeScene>().frame_number(), 0);
    }
}
