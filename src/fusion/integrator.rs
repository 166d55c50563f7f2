//! Per-frame integration of allocator output into the map.

use tracing::{debug, warn};

use crate::allocation::{
    band, dense, parent, BandConfig, DenseConfig, KeyList,
};
use crate::geometry::{PinholeCamera, SE3};
use crate::io::DepthImage;
use crate::map::{Octree, VoxelData};

/// Which traversal decides the octants of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// Fine keys in a band around the surface, coarsening behind it.
    SurfaceBand,
    /// Parent-level keys with forced sibling activation.
    Parent,
    /// Surface-to-camera walk with separate allocation and frustum streams.
    Dense,
}

/// Integration parameters for one map.
#[derive(Debug, Clone, Copy)]
pub struct IntegratorConfig {
    pub strategy: AllocationStrategy,
    /// Keys reserved per output list per frame.
    pub reserved: usize,
    pub band: f32,
    pub doubling_ratio: i32,
    pub min_allocation_size: i32,
    pub max_allocation_size: i32,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            strategy: AllocationStrategy::Dense,
            reserved: 1 << 18,
            band: 0.1,
            doubling_ratio: 1,
            min_allocation_size: 8,
            max_allocation_size: 32,
        }
    }
}

/// What happened while integrating one frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    /// Keys emitted near the surface.
    pub emitted: usize,
    /// Keys emitted for explored-empty frustum space (dense strategy only).
    pub frustum_emitted: usize,
    /// Octree nodes created from the emitted keys.
    pub nodes_created: usize,
    /// Whether any list hit its reservation and dropped keys.
    pub truncated: bool,
}

/// Runs an allocation strategy over incoming frames and feeds the emitted
/// keys to the octree.
pub struct FrameIntegrator {
    config: IntegratorConfig,
}

impl FrameIntegrator {
    pub fn new(config: IntegratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    /// Decide and insert the octants needed to carry `depth` seen from
    /// `t_wc`. Traversal reads the tree in parallel; insertion happens
    /// afterwards on this thread.
    pub fn integrate<T: VoxelData>(
        &self,
        octree: &mut Octree<T>,
        t_wc: &SE3,
        camera: &PinholeCamera,
        depth: &DepthImage,
    ) -> FrameStats {
        let cfg = &self.config;
        let mut stats = FrameStats::default();

        let band_config = BandConfig {
            band: cfg.band,
            doubling_ratio: cfg.doubling_ratio,
            min_allocation_size: cfg.min_allocation_size,
        };

        let mut keys = match cfg.strategy {
            AllocationStrategy::SurfaceBand => {
                let list = KeyList::with_capacity(cfg.reserved);
                stats.emitted =
                    band::build_allocation_list(&list, octree, t_wc, camera, depth, &band_config);
                stats.truncated = list.truncated();
                list.keys()
            }
            AllocationStrategy::Parent => {
                let list = KeyList::with_capacity(cfg.reserved);
                stats.emitted =
                    parent::build_parent_list(&list, octree, t_wc, camera, depth, &band_config);
                stats.truncated = list.truncated();
                list.keys()
            }
            AllocationStrategy::Dense => {
                let allocation = KeyList::with_capacity(cfg.reserved);
                let frustum = KeyList::with_capacity(cfg.reserved);
                let dense_config = DenseConfig {
                    band: cfg.band,
                    doubling_ratio: cfg.doubling_ratio,
                    max_allocation_size: cfg.max_allocation_size,
                };
                let sizes = dense::build_dense_lists(
                    &allocation,
                    &frustum,
                    octree,
                    t_wc,
                    camera,
                    depth,
                    &dense_config,
                );
                stats.emitted = sizes.allocation;
                stats.frustum_emitted = sizes.frustum;
                stats.truncated = allocation.truncated() || frustum.truncated();
                let mut keys = allocation.keys();
                keys.extend(frustum.keys());
                keys
            }
        };

        if stats.truncated {
            warn!(
                reserved = cfg.reserved,
                "key reservation exhausted; map may miss octants this frame"
            );
        }

        stats.nodes_created = octree.allocate(&mut keys);
        debug!(
            emitted = stats.emitted,
            frustum = stats.frustum_emitted,
            created = stats.nodes_created,
            "frame integrated"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::Occupancy;
    use nalgebra::Vector3;

    fn setup() -> (Octree<Occupancy>, SE3, PinholeCamera, DepthImage) {
        let octree = Octree::new(64, 0.32).unwrap();
        let pose = SE3 {
            rotation: nalgebra::UnitQuaternion::identity(),
            translation: Vector3::new(0.16, 0.16, 0.0),
        };
        let camera = PinholeCamera::new(100.0, 100.0, 16.0, 16.0).unwrap();
        let depth = DepthImage::constant(32, 32, 0.3);
        (octree, pose, camera, depth)
    }

    #[test]
    fn test_integration_grows_then_saturates() {
        let (mut octree, pose, camera, depth) = setup();
        let integrator = FrameIntegrator::new(IntegratorConfig {
            strategy: AllocationStrategy::Dense,
            ..Default::default()
        });

        let first = integrator.integrate(&mut octree, &pose, &camera, &depth);
        assert!(first.emitted > 0);
        assert!(first.nodes_created > 0);
        assert!(!first.truncated);

        // The map now carries the frame; a repeat only re-activates.
        let second = integrator.integrate(&mut octree, &pose, &camera, &depth);
        assert_eq!(second.emitted, 0);
        assert_eq!(second.frustum_emitted, 0);
        assert_eq!(second.nodes_created, 0);
    }

    #[test]
    fn test_surface_band_strategy_allocates_surface() {
        let (mut octree, pose, camera, depth) = setup();
        let integrator = FrameIntegrator::new(IntegratorConfig {
            strategy: AllocationStrategy::SurfaceBand,
            ..Default::default()
        });

        integrator.integrate(&mut octree, &pose, &camera, &depth);
        assert!(octree.fetch_octant(32, 32, 56, 3).is_some());
    }
}
