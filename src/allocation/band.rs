//! Surface-band allocator.
//!
//! For every measured pixel, walks a ray from half a band behind the surface
//! towards the camera, emitting keys for the octants the ray crosses. The
//! traversal starts at leaf-block resolution and doubles its step once it is
//! strictly outside the surface band, so distant free space is covered by
//! coarser and coarser octants.

use rayon::prelude::*;

use crate::geometry::{PinholeCamera, SE3};
use crate::io::DepthImage;
use crate::map::{Octree, VoxelData};

use super::dda::{in_bounds, Dda, PixelRay};
use super::KeyList;

/// Parameters of the surface-band traversal.
#[derive(Debug, Clone, Copy)]
pub struct BandConfig {
    /// Metric thickness of the band around the measured surface.
    pub band: f32,
    /// How many step lengths past the band the ray must reach before the
    /// step may double.
    pub doubling_ratio: i32,
    /// Step-doubling cap: growth stops once the step reaches this size.
    /// Clamped to `[block_side, map_size]`. (Historical name: the same
    /// parameter also floors the initial step at the block side.)
    pub min_allocation_size: i32,
}

/// Walk all measured pixels and emit keys for the missing octants along the
/// surface band into `list`; blocks that already exist are re-activated.
/// Returns the number of keys written (at most the list's reservation).
pub fn build_allocation_list<T: VoxelData>(
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
    let min_allocation_size = config
        .min_allocation_size
        .max(init_allocation_size)
        .min(size);

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
            let mut dda = Dda::new(ray.origin_v, ray.direction, allocation_size);

            loop {
                let node = dda.node;
                if in_bounds(&node, size) {
                    match octree.fetch_octant(node.x, node.y, node.z, allocation_level) {
                        None => {
                            let key = octree.hash(
                                node.x,
                                node.y,
                                node.z,
                                allocation_level.min(leaves_level),
                            );
                            list.push(key);
                        }
                        Some(octant) => {
                            if allocation_level >= leaves_level {
                                octant.set_active(true);
                            }
                        }
                    }
                }

                // Double the step once the walk is strictly outside the band
                // and a full doubling_ratio worth of cells past it.
                if (dda.travelled - inv_voxel_dim * band / 2.0)
                    > (doubling_ratio * allocation_size) as f32
                    && (dda.travelled - inv_voxel_dim * band) > 0.0
                    && allocation_size < min_allocation_size
                {
                    allocation_size *= 2;
                    allocation_level -= 1;
                    dda.coarsen(ray.origin_v, ray.direction, allocation_size);
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
