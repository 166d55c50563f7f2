//! TUM RGB-D dataset input.
//!
//! Reads the whitespace-separated `depth.txt` index (`timestamp filename`,
//! `#` comments) and the 16-bit PNG depth maps it names, scaled to metres
//! with the TUM factor of 5000 counts per metre. Ground-truth poses, when
//! present in `groundtruth.txt` (`timestamp tx ty tz qx qy qz qw`), are
//! exposed for replaying a trajectory through the mapper.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use nalgebra::Vector3;
use tracing::warn;

use crate::geometry::SE3;

use super::DepthImage;

/// Depth counts per metre in TUM 16-bit PNGs.
const DEPTH_SCALE: f32 = 5000.0;

#[derive(Debug, Clone)]
pub struct DepthEntry {
    pub timestamp_s: f64,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct GroundTruthEntry {
    pub timestamp_s: f64,
    pub pose: SE3,
}

#[derive(Debug)]
pub struct TumDataset {
    root: PathBuf,
    pub depth_entries: Vec<DepthEntry>,
    pub groundtruth: Vec<GroundTruthEntry>,
}

impl TumDataset {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let depth_entries = load_depth_list(root.join("depth.txt"))?;
        // Ground truth is optional; without it frames replay at identity.
        let groundtruth = load_groundtruth_list(root.join("groundtruth.txt")).unwrap_or_else(|e| {
            warn!("Could not load ground truth: {}. Continuing without it.", e);
            Vec::new()
        });
        Ok(Self {
            root,
            depth_entries,
            groundtruth,
        })
    }

    pub fn len(&self) -> usize {
        self.depth_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth_entries.is_empty()
    }

    /// Decode the depth frame at `idx` to metres.
    pub fn depth_image(&self, idx: usize) -> Result<DepthImage> {
        let entry = self
            .depth_entries
            .get(idx)
            .with_context(|| format!("No depth frame at index {}", idx))?;
        let path = self.root.join(&entry.filename);
        let image = image::open(&path)
            .with_context(|| format!("Failed to read depth image {:?}", path))?
            .into_luma16();

        let (width, height) = image.dimensions();
        let data = image
            .into_raw()
            .into_iter()
            .map(|raw| raw as f32 / DEPTH_SCALE)
            .collect();
        DepthImage::from_vec(width, height, data)
    }

    /// Ground-truth pose nearest to the given timestamp, if any.
    pub fn pose_near(&self, timestamp_s: f64) -> Option<&SE3> {
        let idx = self
            .groundtruth
            .partition_point(|gt| gt.timestamp_s <= timestamp_s);
        let candidates = [idx.checked_sub(1), Some(idx)];
        candidates
            .iter()
            .flatten()
            .filter_map(|&i| self.groundtruth.get(i))
            .min_by(|a, b| {
                let da = (a.timestamp_s - timestamp_s).abs();
                let db = (b.timestamp_s - timestamp_s).abs();
                da.partial_cmp(&db).unwrap()
            })
            .map(|gt| &gt.pose)
    }
}

fn reader_for(csv_path: &Path) -> Result<csv::Reader<std::fs::File>> {
    ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .delimiter(b' ')
        .flexible(true)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open {}", csv_path.display()))
}

fn load_depth_list(csv_path: PathBuf) -> Result<Vec<DepthEntry>> {
    let mut rdr = reader_for(&csv_path)?;
    let mut entries = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        if rec.len() < 2 {
            continue;
        }
        let timestamp_s: f64 = rec[0].trim().parse()?;
        let filename = rec[1].trim().to_string();
        entries.push(DepthEntry {
            timestamp_s,
            filename,
        });
    }
    Ok(entries)
}

fn load_groundtruth_list(csv_path: PathBuf) -> Result<Vec<GroundTruthEntry>> {
    let mut rdr = reader_for(&csv_path)?;
    let mut entries = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        // timestamp tx ty tz qx qy qz qw
        if rec.len() < 8 {
            continue;
        }
        let timestamp_s: f64 = rec[0].trim().parse()?;
        let translation = Vector3::new(
            rec[1].trim().parse()?,
            rec[2].trim().parse()?,
            rec[3].trim().parse()?,
        );
        let qx: f32 = rec[4].trim().parse()?;
        let qy: f32 = rec[5].trim().parse()?;
        let qz: f32 = rec[6].trim().parse()?;
        let qw: f32 = rec[7].trim().parse()?;
        entries.push(GroundTruthEntry {
            timestamp_s,
            pose: SE3::from_quaternion(qw, qx, qy, qz, translation),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn test_parses_depth_list_and_groundtruth() {
        let dir = std::env::temp_dir().join("tum_dataset_test");
        std::fs::create_dir_all(&dir).unwrap();
        write_file(
            &dir,
            "depth.txt",
            "# depth maps\n# timestamp filename\n1.00 depth/1.00.png\n1.03 depth/1.03.png\n",
        );
        write_file(
            &dir,
            "groundtruth.txt",
            "# trajectory\n1.00 0.1 0.2 0.3 0.0 0.0 0.0 1.0\n1.05 0.2 0.2 0.3 0.0 0.0 0.0 1.0\n",
        );

        let dataset = TumDataset::new(&dir).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.depth_entries[1].filename, "depth/1.03.png");
        assert_eq!(dataset.groundtruth.len(), 2);

        let pose = dataset.pose_near(1.01).unwrap();
        assert!((pose.translation.x - 0.1).abs() < 1e-6);
        let pose = dataset.pose_near(1.04).unwrap();
        assert!((pose.translation.x - 0.2).abs() < 1e-6);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_index_is_an_error() {
        assert!(TumDataset::new("/nonexistent/tum/sequence").is_err());
    }
}
