//! SE(3) rigid transforms for mapping.
//!
//! Poses follow the `T_target_source` naming convention: `T_wc` transforms a
//! point from the camera frame to the world frame,
//!
//! ```text
//! p_w = T_wc * p_c
//! ```
//!
//! Mapping runs in `f32`: depth measurements are single precision and the
//! traversal arithmetic downstream is specified in single precision.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

/// A rigid transform: rotation followed by translation.
#[derive(Debug, Clone, Copy)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f32>,
    pub translation: Vector3<f32>,
}

impl SE3 {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from a w-first quaternion and a translation.
    pub fn from_quaternion(qw: f32, qx: f32, qy: f32, qz: f32, translation: Vector3<f32>) -> Self {
        let rotation = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(qw, qx, qy, qz));
        Self {
            rotation,
            translation,
        }
    }

    /// Build from a 4x4 homogeneous matrix. The upper-left 3x3 block must be
    /// a rotation; it is re-orthonormalised through the quaternion
    /// conversion.
    pub fn from_matrix(m: Matrix4<f32>) -> Self {
        let r = m.fixed_view::<3, 3>(0, 0).into_owned();
        let rotation =
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
        let translation = m.fixed_view::<3, 1>(0, 3).into_owned();
        Self {
            rotation,
            translation,
        }
    }

    /// The 4x4 homogeneous matrix of this transform.
    pub fn matrix(&self) -> Matrix4<f32> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(self.rotation.to_rotation_matrix().matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    /// The rotation as a 3x3 matrix.
    pub fn rotation_matrix(&self) -> Matrix3<f32> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Inverse transform: if `self` is `T_ab`, returns `T_ba`.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        let translation = -(rotation * self.translation);
        Self {
            rotation,
            translation,
        }
    }

    /// Composition: `self * other`, applying `other` first.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Transform a point.
    pub fn transform_point(&self, p: &Vector3<f32>) -> Vector3<f32> {
        self.rotation * p + self.translation
    }
}
