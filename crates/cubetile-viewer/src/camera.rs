//! Look-around camera for the panorama.
//!
//! The camera stays at the cube center. Dragging rotates it, the wheel and
//! two-finger pinch change the field of view through [`Zoom`].

use std::f32::consts::FRAC_PI_2;

use bevy::ecs::message::MessageReader;
use bevy::input::mouse::{MouseMotion, MouseScrollUnit, MouseWheel};
use bevy::input::touch::Touches;
use bevy::prelude::*;
use bevy_egui::EguiContexts;
use cubetile::{CameraState, ZoomInput};
use web_time::Instant;

/// Wheel delta in pixels reported for one line of scrolling.
const PIXELS_PER_LINE: f32 = 100.0;
/// Keep the view from flipping over the poles.
const MAX_PITCH: f32 = FRAC_PI_2 - 0.01;

/// Plugin for panorama camera controls.
pub struct CameraControllerPlugin;

impl Plugin for CameraControllerPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<CameraSettings>()
            .init_resource::<ViewInteraction>()
            .add_systems(
                Update,
                (drag_look, wheel_zoom, pinch_zoom, apply_zoom, track_interaction)
                    .chain()
                    .run_if(resource_exists::<Zoom>),
            );
    }
}

/// Settings for camera movement.
#[derive(Resource)]
pub struct CameraSettings {
    /// Radians of rotation per pixel of drag at a 70 degree field of view.
    pub drag_sensitivity: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            drag_sensitivity: 0.004,
        }
    }
}

/// Marker and orientation for the panorama camera.
#[derive(Component, Default)]
pub struct PanoramaCamera {
    pub yaw: f32,
    pub pitch: f32,
}

impl PanoramaCamera {
    fn rotation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, 0.0)
    }
}

/// Zoom state shared by the input systems and the tile loader.
#[derive(Resource)]
pub struct Zoom(pub ZoomInput);

/// Whether the user is moving the view this frame.
#[derive(Resource, Default)]
pub struct ViewInteraction(pub bool);

fn pointer_over_ui(contexts: &mut EguiContexts) -> bool {
    contexts
        .ctx_mut()
        .ok()
        .is_some_and(|ctx| ctx.is_pointer_over_area())
}

/// Rotate the view while the left mouse button or a single touch is held.
#[allow(clippy::needless_pass_by_value)]
fn drag_look(
    mut mouse_motion: MessageReader<MouseMotion>,
    mouse: Res<ButtonInput<MouseButton>>,
    touches: Res<Touches>,
    settings: Res<CameraSettings>,
    zoom: Res<Zoom>,
    mut contexts: EguiContexts,
    mut query: Query<(&mut PanoramaCamera, &mut Transform)>,
) {
    let mut delta: Vec2 = mouse_motion.read().map(|event| event.delta).sum();
    if !mouse.pressed(MouseButton::Left) {
        delta = Vec2::ZERO;
    }
    if touches.iter().count() == 1 {
        delta += touches.iter().map(bevy::input::touch::Touch::delta).sum::<Vec2>();
    }
    if delta == Vec2::ZERO || pointer_over_ui(&mut contexts) {
        return;
    }

    // Slow down when zoomed in so the image follows the pointer.
    let scale = settings.drag_sensitivity * zoom.0.fov() / 70.0;
    for (mut camera, mut transform) in &mut query {
        camera.yaw += delta.x * scale;
        camera.pitch = (camera.pitch + delta.y * scale).clamp(-MAX_PITCH, MAX_PITCH);
        transform.rotation = camera.rotation();
    }
}

fn wheel_zoom(
    mut scroll_events: MessageReader<MouseWheel>,
    mut zoom: ResMut<Zoom>,
    mut contexts: EguiContexts,
) {
    let over_ui = pointer_over_ui(&mut contexts);
    let now = Instant::now();
    for event in scroll_events.read() {
        if over_ui {
            continue;
        }
        // Scrolling up zooms in; native reports lines, web reports pixels.
        let delta = match event.unit {
            MouseScrollUnit::Line => -event.y * PIXELS_PER_LINE,
            MouseScrollUnit::Pixel => -event.y,
        };
        if delta != 0.0 {
            zoom.0.wheel(delta, now);
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn pinch_zoom(touches: Res<Touches>, mut zoom: ResMut<Zoom>) {
    let mut active = touches.iter();
    match (active.next(), active.next()) {
        (Some(a), Some(b)) => {
            zoom.0.pinch(a.position().distance(b.position()));
        }
        _ => zoom.0.pinch_end(),
    }
}

/// The camera follows the zoom immediately; level selection waits for the commit.
#[allow(clippy::needless_pass_by_value)]
fn apply_zoom(zoom: Res<Zoom>, mut query: Query<&mut Projection, With<PanoramaCamera>>) {
    for mut projection in &mut query {
        if let Projection::Perspective(perspective) = projection.as_mut() {
            let fov = zoom.0.fov().to_radians();
            if (perspective.fov - fov).abs() > f32::EPSILON {
                perspective.fov = fov;
            }
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn track_interaction(
    mouse: Res<ButtonInput<MouseButton>>,
    touches: Res<Touches>,
    zoom: Res<Zoom>,
    mut interaction: ResMut<ViewInteraction>,
) {
    let moving =
        mouse.pressed(MouseButton::Left) || touches.iter().next().is_some() || zoom.0.is_active();
    if interaction.0 != moving {
        interaction.0 = moving;
    }
}

/// Camera snapshot for the level-of-detail core.
pub fn camera_state(
    transform: &Transform,
    projection: &Projection,
    interacting: bool,
) -> Option<CameraState> {
    let Projection::Perspective(perspective) = projection else {
        return None;
    };
    Some(CameraState {
        fov: perspective.fov.to_degrees(),
        projection: Mat4::perspective_rh(
            perspective.fov,
            perspective.aspect_ratio,
            perspective.near,
            perspective.far,
        ),
        view: transform.to_matrix().inverse(),
        position: transform.translation,
        interacting,
    })
}
