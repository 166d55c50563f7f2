//! Geometry utilities: SE3 transforms, pinhole camera model.

pub mod camera;
pub mod se3;

pub use camera::PinholeCamera;
pub use se3::SE3;
