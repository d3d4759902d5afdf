//! Frustum culling of faces and cells.

use std::collections::HashMap;

use glam::Vec3;

use crate::face::Face;
use crate::grid::cell_size;
use crate::level::Level;
use crate::types::{Aabb, Cell, CellId, Frustum};

/// Visible cells per face at one level. Faces without visible cells are
/// absent.
pub type VisibleFaces = HashMap<Face, Vec<Cell>>;

/// World-space bounds of a face quad.
#[must_use]
pub fn face_bounds(face: Face, face_size: f32) -> Aabb {
    let corners = face.corners(face_size);
    Aabb::from_points(corners).unwrap_or_else(|| Aabb::from_center_size(corners[0], 0.0))
}

/// Compute the visible cells of every face at `level`.
///
/// `positions` is the level's grid as produced by
/// [`crate::grid::cell_positions`]. Faces are tested first as a whole, then
/// every cell of a surviving face is tested as a cube of one cell edge.
#[must_use]
pub fn compute_visible(
    level: Level,
    positions: &[Vec3],
    frustum: &Frustum,
    face_size: f32,
) -> VisibleFaces {
    let cell = cell_size(level, face_size);
    let mut visible = VisibleFaces::new();

    for face in Face::ALL {
        if !frustum.intersects_aabb(&face_bounds(face, face_size)) {
            continue;
        }

        let matrix = face.matrix(face_size);
        let cells: Vec<Cell> = positions
            .iter()
            .enumerate()
            .filter(|(_, position)| {
                let center = matrix.transform_point3(**position);
                frustum.intersects_aabb(&Aabb::from_center_size(center, cell))
            })
            .map(|(index, position)| Cell {
                id: CellId::from_index(face, index, level),
                position: *position,
            })
            .collect();

        if !cells.is_empty() {
            visible.insert(face, cells);
        }
    }

    visible
}
