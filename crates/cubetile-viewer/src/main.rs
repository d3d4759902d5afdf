//! Cube panorama viewer using Bevy.
//!
//! Shows a 360° panorama from six cube faces and streams finer tiles for the
//! part of the view that is on screen as the user zooms in.

mod async_runtime;
mod camera;
mod launch_params;
mod panorama;
mod tile_material;
mod ui;

use async_runtime::AsyncRuntimePlugin;
use bevy::core_pipeline::tonemapping::Tonemapping;
use bevy::prelude::*;
use camera::{CameraControllerPlugin, PanoramaCamera};
use launch_params::LaunchParams;
use panorama::PanoramaPlugin;
use tile_material::TileMaterialPlugin;
use ui::DebugUiPlugin;

/// Plugin for the main application.
pub struct AppPlugin;

impl Plugin for AppPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins((
            AsyncRuntimePlugin,
            CameraControllerPlugin,
            PanoramaPlugin,
            DebugUiPlugin,
            TileMaterialPlugin,
        ))
        .add_systems(Startup, setup_scene);
    }
}

/// Spawn the camera at the cube center.
#[allow(clippy::needless_pass_by_value)]
fn setup_scene(mut commands: Commands, params: Res<LaunchParams>) {
    commands.spawn((
        Camera3d::default(),
        Camera {
            clear_color: bevy::camera::ClearColorConfig::Custom(Color::BLACK),
            ..default()
        },
        Transform::IDENTITY,
        Projection::Perspective(PerspectiveProjection {
            fov: params.fov.to_radians(),
            near: 0.1,
            far: 100.0,
            ..Default::default()
        }),
        // Disable tonemapping so tiles show their source colors.
        Tonemapping::None,
        PanoramaCamera::default(),
    ));

    tracing::info!("Scene setup complete - drag to look, scroll to zoom");
}

fn main() {
    // Initialize tracing for native platforms.
    #[cfg(not(target_family = "wasm"))]
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Initialize tracing for WASM (logs to browser console).
    #[cfg(target_family = "wasm")]
    {
        console_error_panic_hook::set_once();
        tracing_wasm::set_as_global_default();
    }

    let params = launch_params::parse();

    let mut app = App::new();

    #[allow(unused_mut)]
    let mut window = Window {
        title: "cubetile-viewer".to_string(),
        resolution: (1280, 720).into(),
        ..Default::default()
    };

    // WASM: Fit canvas to parent element and prevent browser event handling.
    #[cfg(target_family = "wasm")]
    {
        window.fit_canvas_to_parent = true;
        window.prevent_default_event_handling = true;
    }

    app.add_plugins(DefaultPlugins.set(WindowPlugin {
        primary_window: Some(window),
        ..Default::default()
    }));

    app.insert_resource(params).add_plugins(AppPlugin).run();
}
