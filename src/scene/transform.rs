//! Local pose of a transform node

use glam::{EulerRot, Mat4, Quat, Vec3};

/// Position, rotation and non-uniform scale relative to the parent frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPose {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for LocalPose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl LocalPose {
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Create pose from position, rotation (euler angles in radians, applied
    /// X then Y then Z), and scale
    pub fn from_components(position: Vec3, rotation_euler: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::from_euler(
                EulerRot::ZYX,
                rotation_euler.z,
                rotation_euler.y,
                rotation_euler.x,
            ),
            scale,
        }
    }

    /// Decompose an affine matrix. Shear is lost.
    pub fn from_matrix(matrix: &Mat4) -> Self {
        let (scale, rotation, position) = matrix.to_scale_rotation_translation();
        Self {
            position,
            rotation: rotation.normalize(),
            scale,
        }
    }

    /// Scale, then rotate, then translate
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Rotation and translation only
    pub fn rigid_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }
}

/// Strip scale from an affine matrix, keeping rotation and translation.
pub(crate) fn rigid(matrix: &Mat4) -> Mat4 {
    LocalPose::from_matrix(matrix).rigid_matrix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn default_is_identity() {
        assert_eq!(LocalPose::default().matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn matrix_round_trip() {
        let pose = LocalPose::new(
            Vec3::new(1.0, -2.0, 3.0),
            Quat::from_rotation_y(0.7),
            Vec3::new(2.0, 0.5, 1.5),
        );
        let back = LocalPose::from_matrix(&pose.matrix());
        assert!(back.position.abs_diff_eq(pose.position, 1e-5));
        assert!(back.scale.abs_diff_eq(pose.scale, 1e-5));
        assert!(back.rotation.abs_diff_eq(pose.rotation, 1e-5));
    }

    #[test]
    fn euler_order_is_x_then_y_then_z() {
        let pose = LocalPose::from_components(Vec3::ZERO, Vec3::new(FRAC_PI_2, 0.0, FRAC_PI_2), Vec3::ONE);
        let expected = Quat::from_rotation_z(FRAC_PI_2) * Quat::from_rotation_x(FRAC_PI_2);
        assert!(pose.rotation.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn rigid_drops_scale() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(3.0, 1.0, 2.0),
            Quat::from_rotation_x(0.3),
            Vec3::new(5.0, 0.0, 1.0),
        );
        let r = rigid(&m);
        let expected = Mat4::from_rotation_translation(Quat::from_rotation_x(0.3), Vec3::new(5.0, 0.0, 1.0));
        assert!(r.abs_diff_eq(expected, 1e-5));
    }
}
