//! Map-side fusion support: occupancy payload, multiscale up-propagation,
//! per-frame integration of allocator output.

pub mod integrator;
pub mod occupancy;

pub use integrator::{AllocationStrategy, FrameIntegrator, FrameStats, IntegratorConfig};
pub use occupancy::{propagate_blocks_up, Occupancy};
