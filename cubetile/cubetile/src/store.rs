//! Per-viewer tile state: level grids and the visible set.

use std::collections::HashMap;

use glam::Vec3;

use crate::culling::VisibleFaces;
use crate::face::Face;
use crate::grid::cell_positions;
use crate::level::Level;
use crate::types::Cell;

/// Default field of view in degrees.
pub const DEFAULT_FOV: f32 = 70.0;

/// Level grids and visible cells for one panorama viewer.
///
/// Created when the viewer mounts and dropped when it unmounts. Only the
/// [`crate::LodController`] writes to it.
#[derive(Debug, Clone)]
pub struct TileStore {
    face_size: f32,
    fov: f32,
    positions: HashMap<Level, Vec<Vec3>>,
    visibles: HashMap<Level, VisibleFaces>,
}

impl TileStore {
    #[must_use]
    pub fn new(face_size: f32) -> Self {
        Self {
            face_size,
            fov: DEFAULT_FOV,
            positions: HashMap::new(),
            visibles: HashMap::new(),
        }
    }

    #[must_use]
    pub fn face_size(&self) -> f32 {
        self.face_size
    }

    /// Last committed field of view.
    #[must_use]
    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn set_fov(&mut self, fov: f32) {
        self.fov = fov;
    }

    /// Generate the cell grid for `level` unless it already exists.
    ///
    /// Returns whether the grid was generated by this call.
    pub fn set_positions(&mut self, level: Level) -> bool {
        if self.positions.contains_key(&level) {
            return false;
        }
        self.positions.insert(level, cell_positions(level, self.face_size));
        true
    }

    #[must_use]
    pub fn has_positions(&self, level: Level) -> bool {
        self.positions.contains_key(&level)
    }

    /// The cell grid for `level`, or an empty slice if none was generated.
    #[must_use]
    pub fn positions(&self, level: Level) -> &[Vec3] {
        self.positions.get(&level).map(Vec::as_slice).unwrap_or_default()
    }

    /// Replace the visible set for `level`.
    pub fn set_visibles(&mut self, level: Level, faces: VisibleFaces) {
        self.visibles.insert(level, faces);
    }

    /// Visible cells of `face` at `level`.
    #[must_use]
    pub fn visibles(&self, level: Level, face: Face) -> &[Cell] {
        self.visibles
            .get(&level)
            .and_then(|faces| faces.get(&face))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Faces with at least one visible cell at `level`, in [`Face::ALL`] order.
    #[must_use]
    pub fn visible_faces(&self, level: Level) -> Vec<Face> {
        let Some(faces) = self.visibles.get(&level) else {
            return Vec::new();
        };
        Face::ALL
            .into_iter()
            .filter(|face| faces.get(face).is_some_and(|cells| !cells.is_empty()))
            .collect()
    }

    /// Total number of visible cells at `level`.
    #[must_use]
    pub fn visible_count(&self, level: Level) -> usize {
        self.visibles
            .get(&level)
            .map_or(0, |faces| faces.values().map(Vec::len).sum())
    }

    /// Number of levels with a generated grid.
    #[must_use]
    pub fn generated_levels(&self) -> usize {
        self.positions.len()
    }
}
