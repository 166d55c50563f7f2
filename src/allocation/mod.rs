//! Adaptive octree allocation from posed depth images.
//!
//! Given a depth frame and its pose, the allocators decide which octree
//! cells must exist to carry the measurement and at what resolution, and
//! re-activate leaf blocks that already exist. They only read the tree and
//! emit packed octant keys into reservation-bounded lists; inserting the
//! nodes is the map's job (`Octree::allocate`), strictly after traversal.
//!
//! Three strategies:
//! - [`band::build_allocation_list`] walks a band around the measured
//!   surface, coarsening the step with distance behind it.
//! - [`parent::build_parent_list`] emits keys one level above the walked
//!   cells and force-activates sibling groups.
//! - [`dense::build_dense_lists`] walks all the way from the surface to the
//!   camera, splitting output into near-surface allocation keys and coarse
//!   frustum keys, with the step adapting against the image mask.
//!
//! Emitted keys come in no particular order and may repeat; consumers
//! deduplicate by key value.

pub mod band;
mod dda;
pub mod dense;
pub mod depth_mask;
pub mod key_list;
pub mod parent;
pub mod reproject;

pub use band::{build_allocation_list, BandConfig};
pub use dense::{build_dense_lists, DenseConfig, DenseListSizes};
pub use depth_mask::DepthMask;
pub use key_list::KeyList;
pub use parent::build_parent_list;
