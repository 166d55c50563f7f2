//! 3D-DDA traversal state over a multi-resolution voxel grid.
//!
//! The walk advances cell-by-cell along a ray, always crossing the nearest
//! cell face: for each axis, `t_max` holds the ray distance (in voxels) at
//! which the next face perpendicular to that axis is crossed, and `delta_t`
//! the distance needed to traverse one full cell along it. Rays with a zero
//! direction component get an infinite `delta_t`, which keeps that axis from
//! ever being selected.
//!
//! Distances are measured in voxels from the traversal origin. Cell corners
//! are quantised with truncating arithmetic; cells outside the map are the
//! caller's concern.

use nalgebra::{Matrix4, Vector3, Vector4};

/// Per-axis `t_max` initialisation from the fractional in-cell position.
pub(crate) fn axis_t_max(direction: f32, frac: f32, delta_t: f32) -> f32 {
    if direction < 0.0 {
        frac * delta_t
    } else {
        (1.0 - frac) * delta_t
    }
}

/// DDA state for a fixed-size cell walk that can coarsen mid-flight.
pub(crate) struct Dda {
    pub step_base: Vector3<i32>,
    pub step: Vector3<i32>,
    pub delta_t: Vector3<f32>,
    pub t_max: Vector3<f32>,
    /// Minimum corner of the current cell, aligned to the cell size.
    pub node: Vector3<i32>,
    /// Distance travelled from the origin, in voxels.
    pub travelled: f32,
}

impl Dda {
    /// Start a walk at `origin_v` (voxel units) along `direction`, over a
    /// grid of `cell_size`-sided cells.
    pub fn new(origin_v: Vector3<f32>, direction: Vector3<f32>, cell_size: i32) -> Self {
        let node = quantize_position(origin_v, cell_size);
        let frac = (origin_v - node.cast::<f32>()) / cell_size as f32;
        let step_base = direction.map(|d| if d < 0.0 { -1 } else { 1 });
        let delta_t = direction.map(|d| cell_size as f32 / d.abs());
        let t_max = Vector3::new(
            axis_t_max(direction.x, frac.x, delta_t.x),
            axis_t_max(direction.y, frac.y, delta_t.y),
            axis_t_max(direction.z, frac.z, delta_t.z),
        );
        Self {
            step_base,
            step: step_base * cell_size,
            delta_t,
            t_max,
            node,
            travelled: 0.0,
        }
    }

    /// Step into the next cell across the nearest face.
    pub fn advance(&mut self) {
        if self.t_max.x < self.t_max.y {
            if self.t_max.x < self.t_max.z {
                self.travelled = self.t_max.x;
                self.node.x += self.step.x;
                self.t_max.x += self.delta_t.x;
            } else {
                self.travelled = self.t_max.z;
                self.node.z += self.step.z;
                self.t_max.z += self.delta_t.z;
            }
        } else if self.t_max.y < self.t_max.z {
            self.travelled = self.t_max.y;
            self.node.y += self.step.y;
            self.t_max.y += self.delta_t.y;
        } else {
            self.travelled = self.t_max.z;
            self.node.z += self.step.z;
            self.t_max.z += self.delta_t.z;
        }
    }

    /// Re-seat the walk on a grid of `cell_size`-sided cells at the current
    /// travelled distance, keeping it coherent after a resolution change.
    ///
    /// The cell corner realigns by truncating division (coordinates that
    /// have wandered negative collapse toward zero); `t_max` restarts from
    /// the position the ray has actually reached.
    pub fn coarsen(&mut self, origin_v: Vector3<f32>, direction: Vector3<f32>, cell_size: i32) {
        let pos_v = origin_v + self.travelled * direction;
        self.node = self.node.map(|c| (c / cell_size) * cell_size);
        let frac = (pos_v - self.node.cast::<f32>()) / cell_size as f32;
        self.delta_t = direction.map(|d| cell_size as f32 / d.abs());
        self.step = self.step_base * cell_size;
        self.t_max = Vector3::new(
            self.travelled + axis_t_max(direction.x, frac.x, self.delta_t.x),
            self.travelled + axis_t_max(direction.y, frac.y, self.delta_t.y),
            self.travelled + axis_t_max(direction.z, frac.z, self.delta_t.z),
        );
    }
}

/// Quantise a voxel-space position to the corner of its `cell_size` cell:
/// floor to a voxel, then truncating division by the cell side.
pub(crate) fn quantize_position(pos_v: Vector3<f32>, cell_size: i32) -> Vector3<i32> {
    pos_v.map(|v| (v.floor() / cell_size as f32) as i32 * cell_size)
}

/// Realign a cell corner to a coarser or finer grid by truncating division.
pub(crate) fn quantize_node(node: Vector3<i32>, cell_size: i32) -> Vector3<i32> {
    node.map(|c| (c / cell_size) * cell_size)
}

/// Whether a cell corner lies inside the `[0, size)³` map cube.
pub(crate) fn in_bounds(node: &Vector3<i32>, size: i32) -> bool {
    node.x >= 0 && node.y >= 0 && node.z >= 0 && node.x < size && node.y < size && node.z < size
}

/// Back-project the centre of pixel `(x, y)` with measured `depth` through
/// the combined inverse projection to a world-space surface point.
fn surface_vertex(inv_p: &Matrix4<f32>, x: i32, y: i32, depth: f32) -> Vector3<f32> {
    let pixel_h = Vector4::new(
        (x as f32 + 0.5) * depth,
        (y as f32 + 0.5) * depth,
        depth,
        1.0,
    );
    (inv_p * pixel_h).xyz()
}

/// Ray geometry shared by all allocators for one depth pixel: the surface
/// point, the surface-to-camera direction, the traversal origin half a band
/// behind the surface, and the origin-to-camera distance in voxels.
pub(crate) struct PixelRay {
    pub direction: Vector3<f32>,
    pub origin_v: Vector3<f32>,
    pub distance: f32,
}

impl PixelRay {
    pub fn new(
        inv_p: &Matrix4<f32>,
        camera_position: Vector3<f32>,
        x: i32,
        y: i32,
        depth: f32,
        band: f32,
        inv_voxel_dim: f32,
    ) -> Self {
        let vertex = surface_vertex(inv_p, x, y, depth);
        let direction = (camera_position - vertex).normalize();
        let origin = vertex - (band * 0.5) * direction;
        Self {
            direction,
            origin_v: inv_voxel_dim * origin,
            distance: inv_voxel_dim * (camera_position - origin).norm(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_axis_aligned_walk() {
        let mut dda = Dda::new(Vector3::new(0.5, 0.25, 0.75), Vector3::new(1.0, 0.0, 0.0), 1);

        assert_eq!(dda.node, Vector3::new(0, 0, 0));
        assert_relative_eq!(dda.t_max.x, 0.5, epsilon = 1e-6);
        assert!(dda.delta_t.y.is_infinite());
        assert!(dda.delta_t.z.is_infinite());

        for i in 1..5 {
            dda.advance();
            assert_eq!(dda.node, Vector3::new(i, 0, 0));
            assert_relative_eq!(dda.travelled, i as f32 - 0.5, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_negative_direction_steps_down() {
        let mut dda = Dda::new(Vector3::new(20.5, 0.5, 0.5), Vector3::new(-1.0, 0.0, 0.0), 8);

        assert_eq!(dda.node, Vector3::new(16, 0, 0));
        dda.advance();
        assert_eq!(dda.node, Vector3::new(8, 0, 0));
        // Half a cell to the lower face.
        assert_relative_eq!(dda.travelled, 4.5, epsilon = 1e-5);
    }

    #[test]
    fn test_travelled_is_monotone_on_diagonal() {
        let direction = Vector3::new(1.0, 0.7, -0.4).normalize();
        let mut dda = Dda::new(Vector3::new(32.3, 40.8, 50.1), direction, 8);

        let mut last = 0.0;
        for _ in 0..64 {
            dda.advance();
            assert!(dda.travelled > last);
            last = dda.travelled;
        }
    }

    #[test]
    fn test_coarsen_keeps_walk_coherent() {
        let origin = Vector3::new(12.4, 9.7, 3.2);
        let direction = Vector3::new(0.6, 0.5, 0.63).normalize();
        let mut dda = Dda::new(origin, direction, 8);

        dda.advance();
        dda.advance();
        let travelled = dda.travelled;

        dda.coarsen(origin, direction, 16);

        // The corner realigns to the coarser grid and the next crossings lie
        // ahead of the current position.
        assert!(dda.node.x % 16 == 0 && dda.node.y % 16 == 0 && dda.node.z % 16 == 0);
        assert_relative_eq!(dda.travelled, travelled, epsilon = 1e-6);
        assert!(dda.t_max.min() >= dda.travelled);

        dda.advance();
        assert!(dda.travelled >= travelled);
    }

    #[test]
    fn test_quantize_truncates_toward_zero() {
        assert_eq!(
            quantize_position(Vector3::new(13.9, 8.0, -0.5), 8),
            // Negative positions collapse toward zero.
            Vector3::new(8, 8, 0)
        );
    }
}
