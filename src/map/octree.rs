//! Arena-based sparse octree.
//!
//! Nodes live in a flat `Vec` and link to each other by index, with the root
//! at index 0. The traversal side of the map (`fetch_octant`, `hash`,
//! activation) works through shared references so the allocators can walk
//! the tree from many threads at once; structural mutation (`allocate`,
//! voxel writes, summary updates) requires `&mut` and happens strictly
//! between frames.
//!
//! Activation is an atomic boolean store. Concurrent activations write the
//! same value and are race-free (idempotent set).

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{ensure, Result};
use nalgebra::Vector3;

use super::{OctantKey, VoxelBlock, VoxelData, BLOCK_SIDE};

const NIL: u32 = u32::MAX;

struct Node<T: VoxelData> {
    key: OctantKey,
    parent: u32,
    children: [u32; 8],
    /// Per-child coarse summaries, maintained by up-propagation.
    summaries: [T; 8],
    /// Frame stamp of the last summary update.
    stamp: u32,
    active: AtomicBool,
    block: Option<Box<VoxelBlock<T>>>,
}

/// Opaque handle to a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(u32);

/// Shared read handle to a node, used on the traversal hot path.
#[derive(Clone, Copy)]
pub struct NodeRef<'a, T: VoxelData> {
    tree: &'a Octree<T>,
    idx: u32,
}

/// Sparse octree over a cube of `size³` voxels spanning `dim` metres.
pub struct Octree<T: VoxelData> {
    size: i32,
    dim: f32,
    voxel_dim: f32,
    max_level: i32,
    leaves_level: i32,
    nodes: Vec<Node<T>>,
}

impl<T: VoxelData> Octree<T> {
    /// Create an empty map. `size` is the side length in voxels (a power of
    /// two, at least two blocks, at most 2^16); `dim` is the metric side
    /// length.
    pub fn new(size: u32, dim: f32) -> Result<Self> {
        ensure!(size.is_power_of_two(), "map size must be a power of two");
        ensure!(
            size as i32 >= 2 * BLOCK_SIDE,
            "map must span at least two voxel blocks per side"
        );
        ensure!(size <= 1 << 16, "map side exceeds key coordinate range");
        ensure!(dim > 0.0, "map dimension must be positive");

        let max_level = size.ilog2() as i32;
        let leaves_level = max_level - BLOCK_SIDE.ilog2() as i32;
        let root = Node {
            key: OctantKey::new(0, 0, 0, 0),
            parent: NIL,
            children: [NIL; 8],
            summaries: [T::empty(); 8],
            stamp: 0,
            active: AtomicBool::new(false),
            block: None,
        };
        Ok(Self {
            size: size as i32,
            dim,
            voxel_dim: dim / size as f32,
            max_level,
            leaves_level,
            nodes: vec![root],
        })
    }

    /// Side length in voxels.
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Metric side length.
    pub fn dim(&self) -> f32 {
        self.dim
    }

    /// Metres per voxel.
    pub fn voxel_dim(&self) -> f32 {
        self.voxel_dim
    }

    /// Level of the finest cells (`log2(size)`).
    pub fn max_level(&self) -> i32 {
        self.max_level
    }

    /// Level at which leaf blocks live.
    pub fn leaves_level(&self) -> i32 {
        self.leaves_level
    }

    /// Side length of a leaf block in voxels.
    pub fn block_side(&self) -> i32 {
        BLOCK_SIDE
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Pack an aligned cell into a key. Coordinates must lie in `[0, size)`
    /// and be aligned to the cell side at `level`.
    pub fn hash(&self, x: i32, y: i32, z: i32, level: i32) -> OctantKey {
        debug_assert!((0..=self.leaves_level).contains(&level));
        debug_assert!([x, y, z].iter().all(|&c| (0..self.size).contains(&c)));
        debug_assert!({
            let side = self.size >> level;
            x % side == 0 && y % side == 0 && z % side == 0
        });
        OctantKey::new(x as u32, y as u32, z as u32, level as u8)
    }

    fn child_slot(x: i32, y: i32, z: i32, edge: i32) -> usize {
        ((x & edge != 0) as usize) | (((y & edge != 0) as usize) << 1) | (((z & edge != 0) as usize) << 2)
    }

    fn find(&self, x: i32, y: i32, z: i32, level: i32) -> Option<u32> {
        let level = level.min(self.leaves_level);
        let mut idx = 0u32;
        let mut edge = self.size >> 1;
        for _ in 0..level {
            let next = self.nodes[idx as usize].children[Self::child_slot(x, y, z, edge)];
            if next == NIL {
                return None;
            }
            idx = next;
            edge >>= 1;
        }
        Some(idx)
    }

    /// Fetch the node containing `(x, y, z)` at `level`, descending at most
    /// to the leaf-block level. Returns `None` if the path is not allocated.
    pub fn fetch_octant(&self, x: i32, y: i32, z: i32, level: i32) -> Option<NodeRef<'_, T>> {
        debug_assert!([x, y, z].iter().all(|&c| (0..self.size).contains(&c)));
        self.find(x, y, z, level).map(|idx| NodeRef { tree: self, idx })
    }

    /// Fetch the leaf block containing the voxel `(x, y, z)`.
    pub fn fetch_block(&self, x: i32, y: i32, z: i32) -> Option<NodeRef<'_, T>> {
        self.fetch_octant(x, y, z, self.leaves_level)
    }

    fn push_node(&mut self, key: OctantKey, parent: u32, block: Option<Box<VoxelBlock<T>>>) -> u32 {
        let idx = self.nodes.len() as u32;
        self.nodes.push(Node {
            key,
            parent,
            children: [NIL; 8],
            summaries: [T::empty(); 8],
            stamp: 0,
            active: AtomicBool::new(false),
            block,
        });
        idx
    }

    /// Materialise all missing children of `parent` (at the level above the
    /// leaves) as voxel blocks. Blocks always exist in full sibling groups so
    /// sibling activation never addresses a missing child.
    fn create_block_group(&mut self, parent: u32) -> usize {
        let base = self.nodes[parent as usize].key.coordinates();
        let mut created = 0;
        for slot in 0..8 {
            if self.nodes[parent as usize].children[slot] != NIL {
                continue;
            }
            let offset = Vector3::new(
                (slot as i32) & 1,
                ((slot as i32) >> 1) & 1,
                ((slot as i32) >> 2) & 1,
            ) * BLOCK_SIDE;
            let coords = base + offset;
            let key = OctantKey::new(
                coords.x as u32,
                coords.y as u32,
                coords.z as u32,
                self.leaves_level as u8,
            );
            let block = Box::new(VoxelBlock::new(coords));
            let idx = self.push_node(key, parent, Some(block));
            self.nodes[parent as usize].children[slot] = idx;
            created += 1;
        }
        created
    }

    fn insert(&mut self, key: OctantKey) -> usize {
        let target = key.level().min(self.leaves_level);
        let (x, y, z) = (key.x(), key.y(), key.z());
        debug_assert!([x, y, z].iter().all(|&c| (0..self.size).contains(&c)));

        let mut created = 0;
        let mut idx = 0u32;
        let mut edge = self.size >> 1;
        for level in 1..=target {
            let slot = Self::child_slot(x, y, z, edge);
            let mut next = self.nodes[idx as usize].children[slot];
            if next == NIL {
                if level == self.leaves_level {
                    created += self.create_block_group(idx);
                    next = self.nodes[idx as usize].children[slot];
                } else {
                    let side = self.size >> level;
                    let node_key = OctantKey::new(
                        (x & !(side - 1)) as u32,
                        (y & !(side - 1)) as u32,
                        (z & !(side - 1)) as u32,
                        level as u8,
                    );
                    next = self.push_node(node_key, idx, None);
                    self.nodes[idx as usize].children[slot] = next;
                    created += 1;
                }
            }
            idx = next;
            edge >>= 1;
        }
        created
    }

    /// Insert the octants named by `keys`, creating missing ancestors on the
    /// way down. Keys are sorted and deduplicated in place (the producers
    /// give no uniqueness guarantee). Returns the number of nodes created.
    pub fn allocate(&mut self, keys: &mut Vec<OctantKey>) -> usize {
        keys.sort_unstable();
        keys.dedup();
        let mut created = 0;
        for &key in keys.iter() {
            created += self.insert(key);
        }
        created
    }

    /// Write a single voxel. Returns `false` if its block is not allocated.
    pub fn set_voxel(&mut self, x: i32, y: i32, z: i32, value: T) -> bool {
        match self.find(x, y, z, self.leaves_level) {
            Some(idx) => match self.nodes[idx as usize].block.as_mut() {
                Some(block) => {
                    block.set(x, y, z, value);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Read a single voxel, if its block is allocated.
    pub fn voxel(&self, x: i32, y: i32, z: i32) -> Option<T> {
        let idx = self.find(x, y, z, self.leaves_level)?;
        self.nodes[idx as usize]
            .block
            .as_ref()
            .map(|block| block.get(x, y, z))
    }

    // ── node-handle accessors (up-propagation and inspection) ───────────────

    pub fn key_of(&self, id: NodeId) -> OctantKey {
        self.nodes[id.0 as usize].key
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes[id.0 as usize].parent;
        (parent != NIL).then_some(NodeId(parent))
    }

    pub fn child_of(&self, id: NodeId, slot: usize) -> Option<NodeId> {
        let child = self.nodes[id.0 as usize].children[slot];
        (child != NIL).then_some(NodeId(child))
    }

    /// The child slot this node occupies within its parent.
    pub fn slot_in_parent(&self, id: NodeId) -> usize {
        let key = self.nodes[id.0 as usize].key;
        let side = self.size >> key.level();
        Self::child_slot(key.x(), key.y(), key.z(), side)
    }

    pub fn summary(&self, id: NodeId, slot: usize) -> T {
        self.nodes[id.0 as usize].summaries[slot]
    }

    pub fn summaries(&self, id: NodeId) -> [T; 8] {
        self.nodes[id.0 as usize].summaries
    }

    pub fn set_summary(&mut self, id: NodeId, slot: usize, value: T) {
        self.nodes[id.0 as usize].summaries[slot] = value;
    }

    pub fn stamp(&self, id: NodeId) -> u32 {
        self.nodes[id.0 as usize].stamp
    }

    pub fn set_stamp(&mut self, id: NodeId, stamp: u32) {
        self.nodes[id.0 as usize].stamp = stamp;
    }

    pub fn block_of(&self, id: NodeId) -> Option<&VoxelBlock<T>> {
        self.nodes[id.0 as usize].block.as_deref()
    }

    pub fn is_active(&self, id: NodeId) -> bool {
        self.nodes[id.0 as usize].active.load(Ordering::Relaxed)
    }
}

impl<'a, T: VoxelData> NodeRef<'a, T> {
    pub fn id(&self) -> NodeId {
        NodeId(self.idx)
    }

    pub fn key(&self) -> OctantKey {
        self.node().key
    }

    pub fn level(&self) -> i32 {
        self.node().key.level()
    }

    pub fn coordinates(&self) -> Vector3<i32> {
        self.node().key.coordinates()
    }

    pub fn is_block(&self) -> bool {
        self.node().block.is_some()
    }

    pub fn active(&self) -> bool {
        self.node().active.load(Ordering::Relaxed)
    }

    /// Idempotent activation flag store; safe under concurrent traversal.
    pub fn set_active(&self, value: bool) {
        self.node().active.store(value, Ordering::Relaxed);
    }

    pub fn parent(&self) -> Option<NodeRef<'a, T>> {
        let parent = self.node().parent;
        (parent != NIL).then_some(NodeRef {
            tree: self.tree,
            idx: parent,
        })
    }

    pub fn child(&self, slot: usize) -> Option<NodeRef<'a, T>> {
        let child = self.node().children[slot];
        (child != NIL).then_some(NodeRef {
            tree: self.tree,
            idx: child,
        })
    }

    fn node(&self) -> &'a Node<T> {
        &self.tree.nodes[self.idx as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Probe(f32);

    impl VoxelData for Probe {
        fn empty() -> Self {
            Probe(0.0)
        }
        fn init() -> Self {
            Probe(0.0)
        }
    }

    fn map() -> Octree<Probe> {
        Octree::new(64, 0.32).unwrap()
    }

    #[test]
    fn test_derived_constants() {
        let oct = map();
        assert_eq!(oct.max_level(), 6);
        assert_eq!(oct.leaves_level(), 3);
        assert!((oct.voxel_dim() - 0.005).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(Octree::<Probe>::new(48, 1.0).is_err());
        assert!(Octree::<Probe>::new(8, 1.0).is_err());
        assert!(Octree::<Probe>::new(64, 0.0).is_err());
    }

    #[test]
    fn test_fetch_on_empty_map() {
        let oct = map();
        assert!(oct.fetch_octant(0, 0, 0, 3).is_none());
        assert!(oct.fetch_octant(63, 63, 63, 1).is_none());
    }

    #[test]
    fn test_allocate_block_creates_sibling_group() {
        let mut oct = map();
        let mut keys = vec![oct.hash(0, 0, 0, 3)];
        let created = oct.allocate(&mut keys);

        // Two internal levels plus eight sibling blocks.
        assert_eq!(created, 2 + 8);
        for slot in 0..8 {
            let x = (slot & 1) as i32 * 8;
            let y = ((slot >> 1) & 1) as i32 * 8;
            let z = ((slot >> 2) & 1) as i32 * 8;
            let node = oct.fetch_octant(x, y, z, 3).expect("sibling block missing");
            assert!(node.is_block());
            assert!(!node.active());
        }
    }

    #[test]
    fn test_allocate_internal_key_stops_above_leaves() {
        let mut oct = map();
        let mut keys = vec![oct.hash(32, 0, 0, 1)];
        oct.allocate(&mut keys);

        let node = oct.fetch_octant(40, 7, 3, 1).unwrap();
        assert!(!node.is_block());
        assert_eq!(node.coordinates(), Vector3::new(32, 0, 0));
        // Nothing exists below the inserted level.
        assert!(oct.fetch_octant(40, 7, 3, 3).is_none());
    }

    #[test]
    fn test_fetch_clamps_to_leaves_level() {
        let mut oct = map();
        let mut keys = vec![oct.hash(8, 8, 8, 3)];
        oct.allocate(&mut keys);

        // Requesting deeper than the leaves returns the block itself.
        let node = oct.fetch_octant(9, 9, 9, 6).unwrap();
        assert!(node.is_block());
        assert_eq!(node.coordinates(), Vector3::new(8, 8, 8));
    }

    #[test]
    fn test_allocate_deduplicates() {
        let mut oct = map();
        let key = oct.hash(0, 8, 16, 3);
        let mut keys = vec![key, key, key];
        oct.allocate(&mut keys);
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_activation_via_node_ref() {
        let mut oct = map();
        let mut keys = vec![oct.hash(16, 16, 16, 3)];
        oct.allocate(&mut keys);

        let node = oct.fetch_octant(16, 16, 16, 3).unwrap();
        node.set_active(true);
        assert!(oct.fetch_octant(16, 16, 16, 3).unwrap().active());
        assert!(oct.is_active(node.id()));
    }

    #[test]
    fn test_parent_child_navigation() {
        let mut oct = map();
        let mut keys = vec![oct.hash(8, 0, 0, 3)];
        oct.allocate(&mut keys);

        let block = oct.fetch_octant(8, 0, 0, 3).unwrap();
        let parent = block.parent().unwrap();
        assert_eq!(parent.level(), 2);

        let slot = oct.slot_in_parent(block.id());
        assert_eq!(slot, 1);
        let back = parent.child(slot).unwrap();
        assert_eq!(back.coordinates(), block.coordinates());
    }

    #[test]
    fn test_voxel_read_write() {
        let mut oct = map();
        assert!(!oct.set_voxel(1, 2, 3, Probe(0.5)));

        let mut keys = vec![oct.hash(0, 0, 0, 3)];
        oct.allocate(&mut keys);
        assert!(oct.set_voxel(1, 2, 3, Probe(0.5)));
        assert_eq!(oct.voxel(1, 2, 3), Some(Probe(0.5)));
        assert_eq!(oct.voxel(60, 60, 60), None);
    }
}
