//! Pinhole camera model.
//!
//! The intrinsics matrix `K` maps a camera-frame point to homogeneous pixel
//! coordinates: `(u, v, 1) ~ K * (x, y, z)`. Back-projection uses `K⁻¹` on
//! `(u·d, v·d, d)` for a pixel at depth `d` metres.

use anyhow::{ensure, Result};
use nalgebra::{Matrix3, Matrix4, Vector3};

use super::SE3;

/// Pinhole intrinsics with the inverse cached at construction.
#[derive(Debug, Clone, Copy)]
pub struct PinholeCamera {
    k: Matrix3<f32>,
    k_inv: Matrix3<f32>,
}

impl PinholeCamera {
    /// Build from `[fx, fy, cx, cy]` intrinsics.
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Result<Self> {
        ensure!(fx > 0.0 && fy > 0.0, "focal lengths must be positive");
        Self::from_matrix(Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0))
    }

    /// Build from a full 3x3 intrinsics matrix.
    pub fn from_matrix(k: Matrix3<f32>) -> Result<Self> {
        let k_inv = k
            .try_inverse()
            .ok_or_else(|| anyhow::anyhow!("intrinsics matrix is singular"))?;
        Ok(Self { k, k_inv })
    }

    pub fn k(&self) -> &Matrix3<f32> {
        &self.k
    }

    pub fn k_inv(&self) -> &Matrix3<f32> {
        &self.k_inv
    }

    /// The combined inverse projection `T_wc · K⁻¹` as a 4x4 matrix.
    ///
    /// Applied to `((u + 0.5)·d, (v + 0.5)·d, d, 1)` it yields the world
    /// position of the measurement at pixel `(u, v)` with depth `d`. Computed
    /// once per frame; the per-pixel work is a single matrix-vector product.
    pub fn inverse_projection(&self, t_wc: &SE3) -> Matrix4<f32> {
        let mut k_inv_h = Matrix4::identity();
        k_inv_h.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.k_inv);
        t_wc.matrix() * k_inv_h
    }

    /// Back-project pixel centre `(u + 0.5, v + 0.5)` at `depth` metres into
    /// the camera frame.
    pub fn back_project(&self, u: f32, v: f32, depth: f32) -> Vector3<f32> {
        self.k_inv * Vector3::new((u + 0.5) * depth, (v + 0.5) * depth, depth)
    }
}
