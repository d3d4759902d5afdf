//! Cell grids for each level.

use glam::Vec3;

use crate::level::Level;

/// Edge length of one cell at `level`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cell_size(level: Level, face_size: f32) -> f32 {
    face_size / level.get() as f32
}

/// Face-local cell centers for `level`, in row-major order.
///
/// Index `i` is the cell at `row = i / level`, `col = i % level`. Rows run top
/// to bottom and columns left to right, matching the tile server layout.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cell_positions(level: Level, face_size: f32) -> Vec<Vec3> {
    let per_edge = level.cells_per_edge();
    let cell = cell_size(level, face_size);
    let half = per_edge as f32 / 2.0;

    let mut positions = Vec::with_capacity(per_edge * per_edge);
    for row in 0..per_edge {
        for col in 0..per_edge {
            positions.push(Vec3::new(
                (col as f32 - half + 0.5) * cell,
                (half - row as f32 - 0.5) * cell,
                0.0,
            ));
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::Face;
    use crate::types::CellId;
    use proptest::prelude::*;

    #[test]
    fn test_level_one_is_centered() {
        assert_eq!(cell_positions(Level::BASE, 10.0), vec![Vec3::ZERO]);
    }

    #[test]
    fn test_level_two_layout() {
        let level = Level::new(2).unwrap();
        let positions = cell_positions(level, 10.0);
        assert_eq!(
            positions,
            vec![
                Vec3::new(-2.5, 2.5, 0.0),
                Vec3::new(2.5, 2.5, 0.0),
                Vec3::new(-2.5, -2.5, 0.0),
                Vec3::new(2.5, -2.5, 0.0),
            ]
        );
        let id = CellId::from_index(Face::Px, 2, level);
        assert_eq!((id.col, id.row), (0, 1));
    }

    proptest! {
        #[test]
        fn cells_tile_the_face(value in 1u32..24, face_size in 1.0f32..100.0) {
            let level = Level::new(value).unwrap();
            let positions = cell_positions(level, face_size);
            let n = value as usize;
            prop_assert_eq!(positions.len(), n * n);

            let cell = cell_size(level, face_size);
            let half = face_size / 2.0;
            let eps = face_size * 1e-4;
            for (i, p) in positions.iter().enumerate() {
                // Each footprint lies within the face.
                prop_assert!(p.x - cell / 2.0 >= -half - eps);
                prop_assert!(p.x + cell / 2.0 <= half + eps);
                prop_assert!(p.y - cell / 2.0 >= -half - eps);
                prop_assert!(p.y + cell / 2.0 <= half + eps);

                // Neighbours in the row are exactly one cell apart, so the
                // footprints neither overlap nor leave gaps.
                if i % n + 1 < n {
                    prop_assert!((positions[i + 1].x - p.x - cell).abs() <= eps);
                }
                if i + n < positions.len() {
                    prop_assert!((p.y - positions[i + n].y - cell).abs() <= eps);
                }
            }
        }
    }
}
