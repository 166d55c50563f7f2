//! Shared state between the front-end and the mapping thread.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::fusion::Occupancy;
use crate::map::Octree;

/// State accessible by the submitting thread and the mapping thread.
///
/// The map is behind an `RwLock`: the mapping thread takes the write lock
/// per frame, anything else (inspection, rendering) reads between frames.
pub struct SharedState {
    /// The occupancy map.
    pub map: RwLock<Octree<Occupancy>>,

    /// Request the mapping thread to finish queued frames and exit.
    pub shutdown_requested: AtomicBool,

    /// Frames fully integrated so far.
    pub frames_integrated: AtomicUsize,

    /// Frames whose key reservation overflowed (retried with a larger
    /// reservation by the operator, not automatically).
    pub frames_truncated: AtomicUsize,
}

impl SharedState {
    pub fn new(map: Octree<Occupancy>) -> Arc<Self> {
        Arc::new(Self {
            map: RwLock::new(map),
            shutdown_requested: AtomicBool::new(false),
            frames_integrated: AtomicUsize::new(0),
            frames_truncated: AtomicUsize::new(0),
        })
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn frames_integrated(&self) -> usize {
        self.frames_integrated.load(Ordering::SeqCst)
    }

    pub fn frames_truncated(&self) -> usize {
        self.frames_truncated.load(Ordering::SeqCst)
    }
}
