//! Sparse multi-resolution voxel map.
//!
//! The map is an octree over a power-of-two cube of voxels. Interior nodes
//! carry per-child summary values (filled by up-propagation); leaves are
//! voxel blocks of side [`block::BLOCK_SIDE`] holding the per-voxel payload.

pub mod block;
pub mod key;
pub mod octree;

pub use block::{VoxelBlock, VoxelData, BLOCK_SIDE};
pub use key::OctantKey;
pub use octree::{NodeId, NodeRef, Octree};
