//! Mapping system - entry point and thread orchestration.
//!
//! The `MappingSystem` owns the shared state and a background mapping
//! thread. The caller submits posed depth frames over a bounded channel; the
//! mapping thread runs the configured allocation strategy and inserts the
//! resulting octants into the map.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info};

use crate::fusion::{FrameIntegrator, IntegratorConfig, Occupancy};
use crate::geometry::PinholeCamera;
use crate::map::Octree;

use super::messages::DepthFrameMsg;
use super::shared_state::SharedState;

/// Capacity of the frame channel. When the mapping thread falls behind, the
/// submitter blocks briefly instead of queueing unbounded frames.
const FRAME_CHANNEL_CAPACITY: usize = 5;

/// Background mapping over a sparse occupancy octree.
pub struct MappingSystem {
    shared: Arc<SharedState>,

    /// Dropped on shutdown to close the channel.
    frame_sender: Option<Sender<DepthFrameMsg>>,

    mapping_handle: Option<JoinHandle<()>>,
}

impl MappingSystem {
    /// Create the shared state and spawn the mapping thread.
    pub fn new(
        map: Octree<Occupancy>,
        camera: PinholeCamera,
        config: IntegratorConfig,
    ) -> Self {
        let shared = SharedState::new(map);
        let (frame_sender, frame_receiver) = bounded::<DepthFrameMsg>(FRAME_CHANNEL_CAPACITY);
        let mapping_handle = Self::spawn_mapping(shared.clone(), frame_receiver, camera, config);
        Self {
            shared,
            frame_sender: Some(frame_sender),
            mapping_handle: Some(mapping_handle),
        }
    }

    fn spawn_mapping(
        shared: Arc<SharedState>,
        frames: Receiver<DepthFrameMsg>,
        camera: PinholeCamera,
        config: IntegratorConfig,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            let integrator = FrameIntegrator::new(config);
            while let Ok(frame) = frames.recv() {
                if shared.is_shutdown_requested() {
                    break;
                }
                let stats = {
                    let mut map = shared.map.write();
                    integrator.integrate(&mut map, &frame.t_wc, &camera, &frame.depth)
                };
                shared.frames_integrated.fetch_add(1, Ordering::SeqCst);
                if stats.truncated {
                    shared.frames_truncated.fetch_add(1, Ordering::SeqCst);
                }
                debug!(
                    timestamp = frame.timestamp_s,
                    emitted = stats.emitted,
                    created = stats.nodes_created,
                    "mapped frame"
                );
            }
            info!(
                frames = shared.frames_integrated(),
                "mapping thread exiting"
            );
        })
    }

    /// Queue a posed depth frame. Blocks while the channel is full; fails
    /// once the system has shut down.
    pub fn submit_frame(&self, frame: DepthFrameMsg) -> Result<()> {
        self.frame_sender
            .as_ref()
            .context("mapping system has shut down")?
            .send(frame)
            .context("mapping thread is gone")
    }

    pub fn shared_state(&self) -> Arc<SharedState> {
        self.shared.clone()
    }

    /// Drain queued frames, stop the mapping thread, and join it.
    pub fn shutdown(&mut self) {
        // Closing the channel lets the thread finish the frames already
        // queued before it sees the disconnect.
        self.frame_sender.take();
        if let Some(handle) = self.mapping_handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for MappingSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
