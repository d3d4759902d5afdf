//! Debug UI for displaying performance metrics and tile streaming state.
//!
//! Shows FPS, field of view, current level, tile counts and texture cache
//! usage.

use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use bevy_egui::{EguiContexts, EguiPlugin, EguiPrimaryContextPass, egui};

use crate::camera::Zoom;
use crate::panorama::{Panorama, TileEntities};

/// Plugin for debug UI overlay.
pub struct DebugUiPlugin;

impl Plugin for DebugUiPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(EguiPlugin::default())
            .add_plugins(FrameTimeDiagnosticsPlugin::default())
            .add_systems(EguiPrimaryContextPass, debug_ui_system);
    }
}

/// Format a byte count with a binary unit.
#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: usize) -> String {
    let bytes = bytes as f64;
    if bytes >= 1024.0 * 1024.0 {
        format!("{:.1} MiB", bytes / (1024.0 * 1024.0))
    } else if bytes >= 1024.0 {
        format!("{:.1} KiB", bytes / 1024.0)
    } else {
        format!("{bytes:.0} B")
    }
}

/// Render the debug UI overlay.
#[allow(clippy::needless_pass_by_value)]
fn debug_ui_system(
    mut contexts: EguiContexts,
    diagnostics: Res<DiagnosticsStore>,
    panorama: Option<Res<Panorama>>,
    zoom: Option<Res<Zoom>>,
    entities: Res<TileEntities>,
) -> Result {
    let ctx = contexts.ctx_mut()?;
    let (Some(panorama), Some(zoom)) = (panorama, zoom) else {
        return Ok(());
    };

    // Get FPS.
    let fps = diagnostics
        .get(&FrameTimeDiagnosticsPlugin::FPS)
        .and_then(bevy::diagnostic::Diagnostic::smoothed)
        .unwrap_or(0.0);

    let level = panorama.controller.level();
    let band = panorama.controller.policy().band(level);
    let stats = panorama.cache.stats();

    // Render the debug panel.
    egui::Window::new("Debug")
        .default_pos([10.0, 10.0])
        .show(ctx, |ui| {
            ui.label(format!("FPS: {fps:.0}"));
            ui.label(format!("FOV: {:.1}°", zoom.0.fov()));
            ui.label(format!(
                "Level: {level} (band {:.1}°-{:.1}°)",
                band.min, band.max
            ));
            ui.label(format!(
                "Base faces: {}/6",
                panorama.base_faces_loaded
            ));
            ui.label(format!(
                "Tiles: {} drawn, {} loading, {} entities",
                panorama.renderer.tile_count(),
                panorama.renderer.pending_count(),
                entities.tile_count()
            ));
            ui.separator();
            ui.label(format!(
                "Textures: {} active, {} inactive, {} disposed",
                stats.active, stats.inactive, stats.disposed
            ));
            ui.label(format!(
                "Queued for disposal: {} / resident {}",
                stats.queued,
                format_bytes(stats.resident_bytes)
            ));
            ui.separator();
            ui.label("Controls:");
            ui.label("  Drag - Look around");
            ui.label("  Wheel / pinch - Zoom");
        });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }
}
