//! The six faces of the panorama cube and where they sit around the viewer.

use std::f32::consts::FRAC_PI_2;
use std::f32::consts::PI;
use std::fmt;

use glam::{Mat4, Quat, Vec3};

/// Face size the placement translations are expressed in.
pub const REFERENCE_FACE_SIZE: f32 = 10.0;

/// One face of the cube panorama.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Face {
    Px,
    Nx,
    Py,
    Ny,
    Pz,
    Nz,
}

impl Face {
    /// All faces, in the order they are loaded and drawn.
    pub const ALL: [Face; 6] = [Face::Px, Face::Nx, Face::Py, Face::Ny, Face::Pz, Face::Nz];

    /// Path component used for this face on the tile server.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Face::Px => "px",
            Face::Nx => "nx",
            Face::Py => "py",
            Face::Ny => "ny",
            Face::Pz => "pz",
            Face::Nz => "nz",
        }
    }

    /// Translation of the face center for a cube of `face_size`.
    #[must_use]
    pub fn translation(self, face_size: f32) -> Vec3 {
        let half = face_size / 2.0;
        match self {
            Face::Px => Vec3::new(-half, 0.0, 0.0),
            Face::Nx => Vec3::new(half, 0.0, 0.0),
            Face::Py => Vec3::new(0.0, half, 0.0),
            Face::Ny => Vec3::new(0.0, -half, 0.0),
            Face::Pz => Vec3::new(0.0, 0.0, half),
            Face::Nz => Vec3::new(0.0, 0.0, -half),
        }
    }

    /// Rotation turning the face plane (z = 0, facing +z) into place.
    #[must_use]
    pub fn rotation(self) -> Quat {
        match self {
            Face::Px => Quat::from_rotation_y(-FRAC_PI_2),
            Face::Nx => Quat::from_rotation_y(FRAC_PI_2),
            Face::Py => Quat::from_rotation_x(-FRAC_PI_2),
            Face::Ny => Quat::from_rotation_x(FRAC_PI_2),
            Face::Pz => Quat::IDENTITY,
            Face::Nz => Quat::from_rotation_y(PI),
        }
    }

    /// Face-local to world transform.
    ///
    /// The face is mirrored on x because it is seen from inside the cube.
    #[must_use]
    pub fn matrix(self, face_size: f32) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            Vec3::new(-1.0, 1.0, 1.0),
            self.rotation(),
            self.translation(face_size),
        )
    }

    /// World-space corners of the face quad.
    #[must_use]
    pub fn corners(self, face_size: f32) -> [Vec3; 4] {
        let half = face_size / 2.0;
        let matrix = self.matrix(face_size);
        [
            Vec3::new(-half, -half, 0.0),
            Vec3::new(half, -half, 0.0),
            Vec3::new(half, half, 0.0),
            Vec3::new(-half, half, 0.0),
        ]
        .map(|corner| matrix.transform_point3(corner))
    }
}

impl fmt::Display for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_centers_lie_on_cube() {
        for face in Face::ALL {
            let center = face.matrix(REFERENCE_FACE_SIZE).transform_point3(Vec3::ZERO);
            assert!((center.abs().max_element() - 5.0).abs() < 1e-5, "{face}");
        }
    }

    #[test]
    fn test_face_quads_face_the_origin() {
        // Every face plane must be perpendicular to its center direction.
        for face in Face::ALL {
            let corners = face.corners(REFERENCE_FACE_SIZE);
            let center = face.translation(REFERENCE_FACE_SIZE);
            let axis = center.normalize();
            for corner in corners {
                assert!((corner.dot(axis) - 5.0).abs() < 1e-4, "{face}");
            }
        }
    }

    #[test]
    fn test_nz_keeps_local_x() {
        let world = Face::Nz
            .matrix(REFERENCE_FACE_SIZE)
            .transform_point3(Vec3::new(2.0, 1.0, 0.0));
        assert!(world.abs_diff_eq(Vec3::new(2.0, 1.0, -5.0), 1e-5));
    }

    #[test]
    fn test_translation_scales_with_face_size() {
        assert_eq!(Face::Pz.translation(20.0), Vec3::new(0.0, 0.0, 10.0));
    }
}
