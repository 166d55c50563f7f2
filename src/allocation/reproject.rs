//! Node-to-image reprojection test.

use nalgebra::Vector3;

use crate::geometry::{PinholeCamera, SE3};
use crate::map::BLOCK_SIDE;

use super::DepthMask;

/// Truncated min/max over the eight corner coordinates.
fn bounds(values: &[f32; 8]) -> (i32, i32) {
    let mut min = values[0];
    let mut max = values[0];
    for &v in &values[1..] {
        if v < min {
            min = v;
        } else if v > max {
            max = v;
        }
    }
    (min as i32, max as i32)
}

/// Decide whether a candidate node is visible and backed by complete depth.
///
/// All eight corners of the node cube must project in front of the camera
/// (camera-frame `z ≥ 1e-4`, keeping the division well away from the image
/// plane) and inside the image with a half-pixel margin on each border. For
/// nodes coarser than a leaf block, every mask cell under the projected
/// bounding box must additionally report complete depth.
pub fn reproject_into_image(
    t_wc: &SE3,
    camera: &PinholeCamera,
    image_size: (i32, i32),
    mask: &DepthMask,
    downsample: i32,
    node: Vector3<i32>,
    voxel_dim: f32,
    node_size: i32,
) -> bool {
    let r_cw = t_wc.rotation.inverse();
    let k = camera.k();
    let base_w = voxel_dim * node.cast::<f32>();
    let extent = voxel_dim * node_size as f32;
    let (width, height) = (image_size.0 as f32, image_size.1 as f32);

    let mut is_inside = true;
    let mut corners_px = [0.0f32; 8];
    let mut corners_py = [0.0f32; 8];

    for (i, (px, py)) in corners_px.iter_mut().zip(corners_py.iter_mut()).enumerate() {
        let dir = Vector3::new(
            (i & 1) as f32,
            ((i >> 1) & 1) as f32,
            ((i >> 2) & 1) as f32,
        );
        let corner_c = r_cw * (base_w + extent * dir - t_wc.translation);
        if corner_c.z < 1e-4 {
            is_inside = false;
            continue;
        }
        let homo = k * corner_c;
        let inverse_depth = 1.0 / homo.z;
        let u = homo.x * inverse_depth + 0.5;
        let v = homo.y * inverse_depth + 0.5;
        *px = u;
        *py = v;
        if u < 0.5 || u > width - 1.5 || v < 0.5 || v > height - 1.5 {
            is_inside = false;
        }
    }

    let mut node_valid = is_inside;
    if is_inside && node_size > BLOCK_SIDE {
        let (x_min, x_max) = bounds(&corners_px);
        let (y_min, y_max) = bounds(&corners_py);
        for y in (y_min / downsample)..=(y_max / downsample) {
            for x in (x_min / downsample)..=(x_max / downsample) {
                if !mask.get(x, y) {
                    node_valid = false;
                }
            }
        }
    }

    node_valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::DepthImage;

    const IMAGE: (i32, i32) = (128, 128);
    const DOWNSAMPLE: i32 = 4;
    const VOXEL_DIM: f32 = 0.005;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(100.0, 100.0, 64.0, 64.0).unwrap()
    }

    fn full_mask() -> DepthMask {
        DepthMask::build(&DepthImage::constant(128, 128, 1.0), DOWNSAMPLE)
    }

    #[test]
    fn test_accepts_node_in_front_of_camera() {
        let visible = reproject_into_image(
            &SE3::identity(),
            &camera(),
            IMAGE,
            &full_mask(),
            DOWNSAMPLE,
            Vector3::new(0, 0, 24),
            VOXEL_DIM,
            8,
        );
        assert!(visible);
    }

    #[test]
    fn test_rejects_node_touching_image_plane() {
        // A corner at z = 0 sits inside the near-clip epsilon.
        let visible = reproject_into_image(
            &SE3::identity(),
            &camera(),
            IMAGE,
            &full_mask(),
            DOWNSAMPLE,
            Vector3::new(0, 0, 0),
            VOXEL_DIM,
            8,
        );
        assert!(!visible);
    }

    #[test]
    fn test_rejects_node_behind_camera() {
        let pose = SE3 {
            rotation: nalgebra::UnitQuaternion::identity(),
            translation: Vector3::new(0.0, 0.0, 0.5),
        };
        let visible = reproject_into_image(
            &pose,
            &camera(),
            IMAGE,
            &full_mask(),
            DOWNSAMPLE,
            Vector3::new(0, 0, 24),
            VOXEL_DIM,
            8,
        );
        assert!(!visible);
    }

    #[test]
    fn test_rejects_node_outside_frustum() {
        // Far off the optical axis: projects past the image border.
        let visible = reproject_into_image(
            &SE3::identity(),
            &camera(),
            IMAGE,
            &full_mask(),
            DOWNSAMPLE,
            Vector3::new(120, 0, 24),
            VOXEL_DIM,
            8,
        );
        assert!(!visible);
    }

    #[test]
    fn test_block_sized_node_skips_mask() {
        let empty_mask = DepthMask::build(&DepthImage::constant(128, 128, 0.0), DOWNSAMPLE);
        let visible = reproject_into_image(
            &SE3::identity(),
            &camera(),
            IMAGE,
            &empty_mask,
            DOWNSAMPLE,
            Vector3::new(0, 0, 32),
            VOXEL_DIM,
            8,
        );
        assert!(visible);
    }

    #[test]
    fn test_coarse_node_requires_complete_mask() {
        // Left image half carries no depth.
        let depth = DepthImage::from_fn(128, 128, |x, _| if x < 64 { 0.0 } else { 1.0 });
        let mask = DepthMask::build(&depth, DOWNSAMPLE);

        // This cube projects onto pixels u ∈ [64.5, 114.5]: valid half only.
        let over_valid = reproject_into_image(
            &SE3::identity(),
            &camera(),
            IMAGE,
            &mask,
            DOWNSAMPLE,
            Vector3::new(0, 0, 32),
            VOXEL_DIM,
            16,
        );
        assert!(over_valid);

        // Mirrored on x, it shadows the invalid half and must be rejected.
        let over_invalid = reproject_into_image(
            &SE3::identity(),
            &camera(),
            IMAGE,
            &mask,
            DOWNSAMPLE,
            Vector3::new(-16, 0, 32),
            VOXEL_DIM,
            16,
        );
        assert!(!over_invalid);
    }
}
