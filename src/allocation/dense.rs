//! Dense allocator.
//!
//! Walks every other measured pixel all the way from the surface band to the
//! camera and emits two key streams: near-surface *allocation* keys, where
//! fine data will be fused, and coarse *frustum* keys covering space the
//! frame has observed as empty. At each cell the step adapts against the
//! reprojection test: cells that fall outside the frustum or shadow
//! incomplete depth contract to block size, cells whose parent cube is fully
//! visible grow, up to a ceiling that itself doubles with distance from the
//! band.

use nalgebra::Vector3;
use rayon::prelude::*;

use crate::geometry::{PinholeCamera, SE3};
use crate::io::DepthImage;
use crate::map::{Octree, VoxelData};

use super::dda::{axis_t_max, in_bounds, quantize_node, quantize_position, PixelRay};
use super::reproject::reproject_into_image;
use super::{DepthMask, KeyList};

/// Mask downsampling factor used by the dense traversal.
const MASK_DOWNSAMPLE: i32 = 4;

/// Parameters of the dense traversal.
#[derive(Debug, Clone, Copy)]
pub struct DenseConfig {
    /// Metric thickness of the band around the measured surface.
    pub band: f32,
    /// How many ceiling lengths past the band the ray must reach before the
    /// step ceiling may double.
    pub doubling_ratio: i32,
    /// Largest step the in-cell growth may reach. Clamped to
    /// `[block_side, map_size]`.
    pub max_allocation_size: i32,
}

/// Number of keys written to each stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenseListSizes {
    pub allocation: usize,
    pub frustum: usize,
}

/// Walk from the surface band out to the camera for every other measured
/// pixel, emitting keys for missing octants into `allocation_list` (near the
/// surface) or `frustum_list` (beyond `2·doubling_ratio` block sides of
/// travel); octants that already exist are re-activated.
pub fn build_dense_lists<T: VoxelData>(
    allocation_list: &KeyList,
    frustum_list: &KeyList,
    octree: &Octree<T>,
    t_wc: &SE3,
    camera: &PinholeCamera,
    depth: &DepthImage,
    config: &DenseConfig,
) -> DenseListSizes {
    let inv_voxel_dim = 1.0 / octree.voxel_dim();
    let voxel_dim = octree.voxel_dim();
    let inv_p = camera.inverse_projection(t_wc);
    let image_size = (depth.width(), depth.height());
    let mask = DepthMask::build(depth, MASK_DOWNSAMPLE);

    let size = octree.size();
    let max_level = octree.max_level();
    let leaves_level = octree.leaves_level();

    let min_allocation_size = octree.block_side();
    let max_allocation_size = config
        .max_allocation_size
        .max(min_allocation_size)
        .min(size);
    let frustum_threshold = (2 * config.doubling_ratio * min_allocation_size) as f32;

    let camera_position = t_wc.translation;
    let band = config.band;
    let doubling_ratio = config.doubling_ratio;

    (0..depth.height())
        .into_par_iter()
        .step_by(2)
        .for_each(|y| {
            for x in (0..depth.width()).step_by(2) {
                let measured = depth.get(x, y);
                if measured == 0.0 {
                    continue;
                }

                let ray =
                    PixelRay::new(&inv_p, camera_position, x, y, measured, band, inv_voxel_dim);
                let direction = ray.direction;
                let step_base = direction.map(|d| if d < 0.0 { -1 } else { 1 });

                let mut curr_allocation_size = min_allocation_size;
                let mut curr_allocation_level = max_level - curr_allocation_size.ilog2() as i32;
                let mut curr_max_allocation_size = min_allocation_size;

                let mut curr_node = quantize_position(ray.origin_v, curr_allocation_size);
                // Axis and coordinate of the last DDA move, used to clamp
                // away backtracking after truncation.
                let mut last_move = (0usize, curr_node.x);
                let mut travelled = 0.0f32;

                loop {
                    if in_bounds(&curr_node, size) {
                        let last_node = curr_node;
                        let mut is_halfend = false;

                        // Adapt the step to the visibility of this cell:
                        // shrink while the cube fails the reprojection test,
                        // otherwise try to grow into the parent cube once.
                        loop {
                            curr_node = quantize_node(last_node, curr_allocation_size);
                            if curr_allocation_size > min_allocation_size {
                                if !reproject_into_image(
                                    t_wc,
                                    camera,
                                    image_size,
                                    &mask,
                                    MASK_DOWNSAMPLE,
                                    curr_node,
                                    voxel_dim,
                                    curr_allocation_size,
                                ) {
                                    curr_allocation_size /= 2;
                                    curr_allocation_level += 1;
                                    is_halfend = true;
                                    continue;
                                }
                            } else if !reproject_into_image(
                                t_wc,
                                camera,
                                image_size,
                                &mask,
                                MASK_DOWNSAMPLE,
                                curr_node,
                                voxel_dim,
                                curr_allocation_size,
                            ) {
                                break;
                            }
                            if 2 * curr_allocation_size > curr_max_allocation_size || is_halfend {
                                break;
                            }

                            let grown_size = 2 * curr_allocation_size;
                            let grown_node = quantize_node(last_node, grown_size);
                            if !reproject_into_image(
                                t_wc,
                                camera,
                                image_size,
                                &mask,
                                MASK_DOWNSAMPLE,
                                grown_node,
                                voxel_dim,
                                grown_size,
                            ) {
                                break;
                            }
                            curr_allocation_size = grown_size;
                            curr_allocation_level -= 1;
                            curr_node = grown_node;
                        }

                        match octree.fetch_octant(
                            curr_node.x,
                            curr_node.y,
                            curr_node.z,
                            curr_allocation_level,
                        ) {
                            None => {
                                let key = octree.hash(
                                    curr_node.x,
                                    curr_node.y,
                                    curr_node.z,
                                    curr_allocation_level.min(leaves_level),
                                );
                                if travelled > frustum_threshold {
                                    frustum_list.push(key);
                                } else {
                                    allocation_list.push(key);
                                }
                            }
                            Some(octant) => octant.set_active(true),
                        }
                    }

                    // The step ceiling doubles with distance from the band,
                    // independently of the in-cell adaptation.
                    if (travelled - inv_voxel_dim * band / 2.0)
                        > (doubling_ratio * curr_max_allocation_size) as f32
                        && (travelled - inv_voxel_dim * band) > 0.0
                        && curr_allocation_size < max_allocation_size
                    {
                        curr_max_allocation_size *= 2;
                    }

                    // Re-seat the DDA on the (possibly resized) grid and
                    // advance across the nearest cell face.
                    let curr_pos_v = ray.origin_v + travelled * direction;
                    let frac =
                        (curr_pos_v - curr_node.cast::<f32>()) / curr_allocation_size as f32;
                    let delta_t =
                        direction.map(|d| curr_allocation_size as f32 / d.abs());
                    let t_max = Vector3::new(
                        travelled + axis_t_max(direction.x, frac.x, delta_t.x),
                        travelled + axis_t_max(direction.y, frac.y, delta_t.y),
                        travelled + axis_t_max(direction.z, frac.z, delta_t.z),
                    );

                    let axis = if t_max.x < t_max.y {
                        if t_max.x < t_max.z {
                            0
                        } else {
                            2
                        }
                    } else if t_max.y < t_max.z {
                        1
                    } else {
                        2
                    };

                    travelled = t_max[axis];
                    curr_node = (ray.origin_v + travelled * direction).map(|v| v as i32);
                    curr_node[axis] += step_base[axis];

                    // A large step can truncate the recomputed coordinate
                    // behind the last crossing on its axis; clamp it forward.
                    let (last_axis, last_coord) = last_move;
                    if step_base[last_axis] * curr_node[last_axis]
                        < step_base[last_axis] * last_coord
                    {
                        curr_node[last_axis] = last_coord;
                    }
                    last_move = (axis, curr_node[axis]);

                    if ray.distance - travelled <= 0.1 {
                        break;
                    }
                }
            }
        });

    DenseListSizes {
        allocation: allocation_list.len(),
        frustum: frustum_list.len(),
    }
}
