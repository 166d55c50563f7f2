//! Depth images.

use anyhow::{ensure, Result};

/// A row-major depth image in metres. A value of `0` means "no measurement".
#[derive(Debug, Clone)]
pub struct DepthImage {
    width: i32,
    height: i32,
    data: Vec<f32>,
}

impl DepthImage {
    /// Wrap a row-major buffer of `width * height` depths.
    pub fn from_vec(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        ensure!(width > 0 && height > 0, "depth image must be non-empty");
        ensure!(
            data.len() == (width * height) as usize,
            "depth buffer length {} does not match {}x{}",
            data.len(),
            width,
            height
        );
        Ok(Self {
            width: width as i32,
            height: height as i32,
            data,
        })
    }

    /// Build an image by evaluating `f(x, y)` for every pixel. Handy for
    /// synthetic frames.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> Self {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width: width as i32,
            height: height as i32,
            data,
        }
    }

    /// An image with the same depth everywhere.
    pub fn constant(width: u32, height: u32, depth: f32) -> Self {
        Self::from_fn(width, height, |_, _| depth)
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Depth at `(x, y)`; coordinates must be in range.
    pub fn get(&self, x: i32, y: i32) -> f32 {
        self.data[(x + y * self.width) as usize]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_checks_length() {
        assert!(DepthImage::from_vec(4, 4, vec![0.0; 15]).is_err());
        assert!(DepthImage::from_vec(4, 4, vec![0.0; 16]).is_ok());
    }

    #[test]
    fn test_row_major_indexing() {
        let img = DepthImage::from_fn(3, 2, |x, y| (x + 10 * y) as f32);
        assert_eq!(img.get(2, 0), 2.0);
        assert_eq!(img.get(0, 1), 10.0);
        assert_eq!(img.get(2, 1), 12.0);
    }
}
