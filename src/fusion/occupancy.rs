//! Occupancy payload and multiscale up-propagation.
//!
//! Interior octree nodes hold one summary slot per child. After blocks are
//! updated, their mean occupancy is pushed into the parent's slot and the
//! means cascade level by level up to the root, so coarse queries (rendering
//! LOD, planning) can read a subtree's occupancy without touching blocks.

use std::collections::VecDeque;

use crate::map::{NodeId, Octree, VoxelData};

/// Per-voxel occupancy state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Occupancy {
    /// Log-odds of the voxel being occupied; 0 is unknown.
    pub log_odds: f32,
    /// Number of fused observations.
    pub observations: u32,
}

impl Occupancy {
    pub fn occupied(log_odds: f32) -> Self {
        Self {
            log_odds,
            observations: 1,
        }
    }
}

impl VoxelData for Occupancy {
    fn empty() -> Self {
        Self {
            log_odds: 0.0,
            observations: 0,
        }
    }

    fn init() -> Self {
        Self::empty()
    }
}

/// Mean occupancy over a node's eight summary slots. Missing children count
/// as unknown, so a sparsely observed subtree stays close to unknown.
fn mean_summary(summaries: &[Occupancy; 8]) -> Occupancy {
    let log_odds = summaries.iter().map(|s| s.log_odds).sum::<f32>() / 8.0;
    let observations = summaries.iter().map(|s| s.observations).sum::<u32>() / 8;
    Occupancy {
        log_odds,
        observations,
    }
}

/// Propagate updated blocks up to the root.
///
/// Each block's mean voxel occupancy is written into its parent's summary
/// slot; parents then cascade their slot means upwards. `frame` stamps nodes
/// so shared ancestors are aggregated once per call even when many blocks
/// sit under them.
pub fn propagate_blocks_up(octree: &mut Octree<Occupancy>, blocks: &[NodeId], frame: u32) {
    let mut queue: VecDeque<NodeId> = VecDeque::new();

    for &block_id in blocks {
        let Some(block) = octree.block_of(block_id) else {
            continue;
        };
        let count = block.values().count() as f32;
        let log_odds = block.values().map(|v| v.log_odds).sum::<f32>() / count;
        let observations =
            (block.values().map(|v| v.observations as u64).sum::<u64>() / count as u64) as u32;
        let summary = Occupancy {
            log_odds,
            observations,
        };

        if let Some(parent) = octree.parent_of(block_id) {
            let slot = octree.slot_in_parent(block_id);
            octree.set_summary(parent, slot, summary);
            queue.push_back(parent);
        }
    }

    while let Some(node) = queue.pop_front() {
        if octree.stamp(node) == frame {
            continue;
        }
        octree.set_stamp(node, frame);

        if let Some(parent) = octree.parent_of(node) {
            let summary = mean_summary(&octree.summaries(node));
            let slot = octree.slot_in_parent(node);
            octree.set_summary(parent, slot, summary);
            queue.push_back(parent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    /// Allocate every block of a 64-voxel map and mark four whole blocks
    /// occupied; the means must cascade into the expected root slots.
    #[test]
    fn test_means_cascade_to_root() {
        let mut octree: Octree<Occupancy> = Octree::new(64, 0.32).unwrap();
        let mut keys = Vec::new();
        for z in (0..64).step_by(8) {
            for y in (0..64).step_by(8) {
                for x in (0..64).step_by(8) {
                    keys.push(octree.hash(x, y, z, octree.leaves_level()));
                }
            }
        }
        octree.allocate(&mut keys);

        let occupied = [
            Vector3::new(0, 0, 0),
            Vector3::new(8, 8, 0),
            Vector3::new(48, 48, 0),
            Vector3::new(56, 56, 0),
        ];
        let mut updated = Vec::new();
        for corner in occupied {
            for x in 0..8 {
                for y in 0..8 {
                    for z in 0..8 {
                        octree.set_voxel(
                            corner.x + x,
                            corner.y + y,
                            corner.z + z,
                            Occupancy::occupied(1.0),
                        );
                    }
                }
            }
            updated.push(
                octree
                    .fetch_block(corner.x, corner.y, corner.z)
                    .unwrap()
                    .id(),
            );
        }

        propagate_blocks_up(&mut octree, &updated, 1);

        // Root octant 0 holds blocks (0,0,0) and (8,8,0): 2 of its 64
        // blocks are fully occupied. Octant 3 holds the other two. The rest
        // of the map is untouched.
        let root = octree.root();
        for (slot, expected) in [
            (0, 2.0 / 64.0),
            (1, 0.0),
            (2, 0.0),
            (3, 2.0 / 64.0),
            (4, 0.0),
            (5, 0.0),
            (6, 0.0),
            (7, 0.0),
        ] {
            assert_relative_eq!(
                octree.summary(root, slot).log_odds,
                expected,
                epsilon = 1e-6
            );
        }

        // One level down, the two occupied blocks of octant 0 both live in
        // its first child octant.
        let child = octree.child_of(root, 0).unwrap();
        assert_relative_eq!(octree.summary(child, 0).log_odds, 2.0 / 8.0, epsilon = 1e-6);
        for slot in 1..8 {
            assert_relative_eq!(octree.summary(child, slot).log_odds, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_repeated_propagation_is_stable() {
        let mut octree: Octree<Occupancy> = Octree::new(64, 0.32).unwrap();
        let mut keys = vec![octree.hash(0, 0, 0, octree.leaves_level())];
        octree.allocate(&mut keys);

        for x in 0..8 {
            for y in 0..8 {
                for z in 0..8 {
                    octree.set_voxel(x, y, z, Occupancy::occupied(0.5));
                }
            }
        }
        let block = octree.fetch_block(0, 0, 0).unwrap().id();

        propagate_blocks_up(&mut octree, &[block], 1);
        let first = octree.summary(octree.root(), 0).log_odds;
        propagate_blocks_up(&mut octree, &[block], 2);
        let second = octree.summary(octree.root(), 0).log_odds;

        assert_relative_eq!(first, second, epsilon = 1e-6);
    }
}
