//! Messages between the front-end and the mapping thread.

use crate::geometry::SE3;
use crate::io::DepthImage;

/// A posed depth frame queued for integration.
#[derive(Debug, Clone)]
pub struct DepthFrameMsg {
    pub timestamp_s: f64,
    /// World-from-camera pose of the frame.
    pub t_wc: SE3,
    pub depth: DepthImage,
}
