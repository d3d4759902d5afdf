//! Shared types for cells, tiles, camera state and culling volumes.

use std::fmt;

use glam::{Mat4, Vec3, Vec4};

use crate::error::{Error, Result};
use crate::face::Face;
use crate::level::Level;

/// Identity of one grid cell on a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub face: Face,
    pub col: u32,
    pub row: u32,
}

impl CellId {
    /// Recover the cell identity from its row-major index in a level grid.
    #[must_use]
    pub fn from_index(face: Face, index: usize, level: Level) -> Self {
        let per_edge = level.cells_per_edge();
        Self {
            face,
            col: u32::try_from(index % per_edge).unwrap_or(u32::MAX),
            row: u32::try_from(index / per_edge).unwrap_or(u32::MAX),
        }
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.face, self.col, self.row)
    }
}

/// A visible cell and its face-local center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub id: CellId,
    pub position: Vec3,
}

/// Key of the per-face tile group at one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub face: Face,
    pub level: Level,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.face, self.level)
    }
}

/// Identity of a drawn tile: a cell at a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileName {
    pub level: Level,
    pub cell: CellId,
}

impl TileName {
    #[must_use]
    pub fn face(&self) -> Face {
        self.cell.face
    }

    #[must_use]
    pub fn group(&self) -> GroupKey {
        GroupKey {
            face: self.cell.face,
            level: self.level,
        }
    }
}

impl fmt::Display for TileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.cell, self.level)
    }
}

/// Camera state sampled by the host each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    /// Vertical field of view in degrees.
    pub fov: f32,
    /// Clip-from-view matrix.
    pub projection: Mat4,
    /// View-from-world matrix.
    pub view: Mat4,
    /// Camera position in world space.
    pub position: Vec3,
    /// Whether the user is currently dragging or zooming.
    pub interacting: bool,
}

impl CameraState {
    /// Combined clip-from-world matrix.
    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Smallest box containing all `points`. Returns `None` when empty.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    /// Box of edge length `size` centered on `center`.
    #[must_use]
    pub fn from_center_size(center: Vec3, size: f32) -> Self {
        let half = Vec3::splat(size / 2.0);
        Self {
            min: center - half,
            max: center + half,
        }
    }

    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[must_use]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }
}

/// A frustum for culling faces and cells.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    /// Frustum planes as (normal, distance), pointing inwards.
    planes: [(Vec3, f32); 6],
}

impl Frustum {
    /// Create a frustum from a clip-from-world matrix.
    ///
    /// Depth is expected in `[0, 1]`, either standard or reversed, as produced
    /// by glam's `*_rh` projections.
    pub fn from_view_projection(vp: Mat4) -> Result<Self> {
        if !vp.is_finite() {
            return Err(Error::InvalidCamera {
                detail: "view-projection matrix is not finite",
            });
        }

        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];
        let [x, y, z, w] = rows;

        // Left, right, bottom, top, then the two depth planes. With reversed
        // depth the last two swap roles, which the test does not care about.
        let planes = [
            Self::normalize_plane(w + x),
            Self::normalize_plane(w - x),
            Self::normalize_plane(w + y),
            Self::normalize_plane(w - y),
            Self::normalize_plane(z),
            Self::normalize_plane(w - z),
        ];

        if planes.iter().all(|(normal, _)| *normal == Vec3::ZERO) {
            return Err(Error::InvalidCamera {
                detail: "view-projection matrix is degenerate",
            });
        }

        Ok(Self { planes })
    }

    fn normalize_plane(plane: Vec4) -> (Vec3, f32) {
        let normal = plane.truncate();
        let length = normal.length();
        if length > 0.0 {
            (normal / length, plane.w / length)
        } else {
            (Vec3::ZERO, 0.0)
        }
    }

    /// Test if an axis-aligned box intersects the frustum.
    ///
    /// Conservative: boxes near a frustum corner may pass without touching it.
    #[must_use]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        let center = aabb.center();
        let extents = aabb.half_extents();
        for &(normal, distance) in &self.planes {
            let r = extents.dot(normal.abs());
            let d = normal.dot(center) + distance;

            // Entirely behind the plane means outside the frustum.
            if d < -r {
                return false;
            }
        }
        true
    }

    /// Test if a point is inside the frustum.
    #[must_use]
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|&(normal, distance)| normal.dot(point) + distance >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looking_down_neg_z() -> Frustum {
        let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let projection = Mat4::orthographic_rh(-2.0, 2.0, -2.0, 2.0, 0.1, 20.0);
        Frustum::from_view_projection(projection * view).unwrap()
    }

    #[test]
    fn test_cell_id_from_index_is_row_major() {
        let level = Level::new(3).unwrap();
        let id = CellId::from_index(Face::Pz, 5, level);
        assert_eq!((id.col, id.row), (2, 1));
        assert_eq!(id.to_string(), "pz-2-1");
    }

    #[test]
    fn test_names() {
        let level = Level::new(2).unwrap();
        let cell = CellId {
            face: Face::Nx,
            col: 1,
            row: 0,
        };
        let name = TileName { level, cell };
        assert_eq!(name.to_string(), "nx-1-0-2");
        assert_eq!(name.group().to_string(), "nx-2");
    }

    #[test]
    fn test_aabb_from_points() {
        let aabb = Aabb::from_points([Vec3::new(1.0, -2.0, 0.0), Vec3::new(-1.0, 3.0, 4.0)]).unwrap();
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 3.0, 4.0));
        assert!(Aabb::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn test_aabb_from_center_size() {
        let aabb = Aabb::from_center_size(Vec3::new(0.0, 0.0, -5.0), 2.0);
        assert_eq!(aabb.half_extents(), Vec3::ONE);
        assert_eq!(aabb.center(), Vec3::new(0.0, 0.0, -5.0));
    }

    #[test]
    fn test_frustum_inside_and_outside() {
        let frustum = looking_down_neg_z();
        let inside = Aabb::from_center_size(Vec3::new(0.0, 0.0, -5.0), 1.0);
        let beside = Aabb::from_center_size(Vec3::new(4.0, 0.0, -5.0), 1.0);
        let behind = Aabb::from_center_size(Vec3::new(0.0, 0.0, 5.0), 1.0);
        let too_far = Aabb::from_center_size(Vec3::new(0.0, 0.0, -30.0), 1.0);
        assert!(frustum.intersects_aabb(&inside));
        assert!(!frustum.intersects_aabb(&beside));
        assert!(!frustum.intersects_aabb(&behind));
        assert!(!frustum.intersects_aabb(&too_far));
    }

    #[test]
    fn test_frustum_straddling_box() {
        let frustum = looking_down_neg_z();
        let straddling = Aabb::from_center_size(Vec3::new(2.0, 0.0, -5.0), 1.0);
        assert!(frustum.intersects_aabb(&straddling));
        assert!(!frustum.contains_point(straddling.center() + Vec3::X * 0.4));
    }

    #[test]
    fn test_reversed_depth_perspective() {
        let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let projection = Mat4::perspective_infinite_reverse_rh(90f32.to_radians(), 1.0, 0.1);
        let frustum = Frustum::from_view_projection(projection * view).unwrap();
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -5.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 5.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -0.01)));
    }

    #[test]
    fn test_non_finite_matrix_is_rejected() {
        let mut cols = Mat4::IDENTITY.to_cols_array();
        cols[5] = f32::NAN;
        let result = Frustum::from_view_projection(Mat4::from_cols_array(&cols));
        assert!(matches!(result, Err(Error::InvalidCamera { .. })));
        assert!(matches!(
            Frustum::from_view_projection(Mat4::ZERO),
            Err(Error::InvalidCamera { .. })
        ));
    }
}
