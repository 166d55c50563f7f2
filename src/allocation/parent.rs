//! Parent allocator.
//!
//! Same ray geometry as the surface-band allocator, but the walk is
//! quantised to the *parent* of the would-be leaf cell and keys are emitted
//! one level coarser. When the walked cell already exists as a leaf block,
//! the whole sibling group under its parent is re-activated. Callers use
//! this when neighbourhood completeness matters, e.g. for gradient or
//! up-propagation operators that read across block boundaries.

use rayon::prelude::*;

use crate::geometry::{PinholeCamera, SE3};
use crate::io::DepthImage;
use crate::map::{Octree, VoxelData};

use super::band::BandConfig;
use super::dda::{in_bounds, Dda, PixelRay};
use super::KeyList;

/// Walk all measured pixels and emit parent-level keys for missing octants
/// into `list`; where leaf blocks already exist, all eight siblings under
/// their parent are activated. Returns the number of keys written.
pub fn build_parent_list<T: VoxelData>(
    list: &KeyList,
    octree: &Octree<T>,
    t_wc: &SE3,
    camera: &PinholeCamera,
    depth: &DepthImage,
    config: &BandConfig,
) -> usize {
    let inv_voxel_dim = 1.0 / octree.voxel_dim();
    let inv_p = camera.inverse_projection(t_wc);
    let size = octree.size();
    let max_level = octree.max_level();
    let leaves_level = octree.leaves_level();

    let init_allocation_size = octree.block_side();
    // The parent cell must stay within the map, so the growth cap leaves one
    // level of headroom.
    let min_allocation_size = config
        .min_allocation_size
        .max(init_allocation_size)
        .min(size / 2);

    let camera_position = t_wc.translation;
    let band = config.band;
    let doubling_ratio = config.doubling_ratio;

    (0..depth.height()).into_par_iter().for_each(|y| {
        for x in 0..depth.width() {
            let measured = depth.get(x, y);
            if measured == 0.0 {
                continue;
            }

            let ray = PixelRay::new(&inv_p, camera_position, x, y, measured, band, inv_voxel_dim);

            let mut allocation_size = init_allocation_size;
            let mut allocation_level = max_level - allocation_size.ilog2() as i32;
            let mut parent_size = 2 * allocation_size;
            let mut parent_level = allocation_level - 1;
            let mut dda = Dda::new(ray.origin_v, ray.direction, parent_size);

            loop {
                let node = dda.node;
                if in_bounds(&node, size) {
                    match octree.fetch_octant(node.x, node.y, node.z, allocation_level) {
                        None => {
                            list.push(octree.hash(node.x, node.y, node.z, parent_level));
                        }
                        Some(octant) => {
                            if allocation_level >= leaves_level {
                                if let Some(parent) = octant.parent() {
                                    for slot in 0..8 {
                                        if let Some(sibling) = parent.child(slot) {
                                            sibling.set_active(true);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }

                if (dda.travelled - inv_voxel_dim * band / 2.0)
                    > (doubling_ratio * allocation_size) as f32
                    && (dda.travelled - inv_voxel_dim * band) > 0.0
                    && allocation_size < min_allocation_size
                {
                    allocation_size *= 2;
                    parent_size = 2 * allocation_size;
                    allocation_level -= 1;
                    parent_level = allocation_level - 1;
                    dda.coarsen(ray.origin_v, ray.direction, parent_size);
                }

                dda.advance();
                if ray.distance - dda.travelled <= 0.0 {
                    break;
                }
            }
        }
    });

    list.len()
}
