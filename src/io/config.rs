//! YAML mapping configuration.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::fusion::{AllocationStrategy, IntegratorConfig};
use crate::geometry::PinholeCamera;

/// Map geometry section.
#[derive(Debug, Clone, Deserialize)]
pub struct MapYaml {
    /// Side length in voxels (power of two).
    pub size: u32,
    /// Metric side length in metres.
    pub dim: f32,
}

/// Camera section: `[fx, fy, cx, cy]` intrinsics plus the image size.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraYaml {
    pub intrinsics: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

/// Allocation section; every field has a working default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AllocationYaml {
    pub strategy: String,
    pub reserved: usize,
    pub band: f32,
    pub doubling_ratio: i32,
    pub min_allocation_size: i32,
    pub max_allocation_size: i32,
}

impl Default for AllocationYaml {
    fn default() -> Self {
        let defaults = IntegratorConfig::default();
        Self {
            strategy: "dense".to_string(),
            reserved: defaults.reserved,
            band: defaults.band,
            doubling_ratio: defaults.doubling_ratio,
            min_allocation_size: defaults.min_allocation_size,
            max_allocation_size: defaults.max_allocation_size,
        }
    }
}

/// Top-level mapping configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MappingConfig {
    pub map: MapYaml,
    pub camera: CameraYaml,
    #[serde(default)]
    pub allocation: AllocationYaml,
}

impl MappingConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let config: MappingConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.camera.intrinsics.len() != 4 {
            bail!(
                "Expected 4 intrinsics [fx, fy, cx, cy], got {}",
                self.camera.intrinsics.len()
            );
        }
        if self.allocation.band <= 0.0 {
            bail!("band must be positive");
        }
        if self.allocation.doubling_ratio < 1 {
            bail!("doubling_ratio must be at least 1");
        }
        Ok(())
    }

    /// Build the pinhole camera from the intrinsics section.
    pub fn pinhole_camera(&self) -> Result<PinholeCamera> {
        let k = &self.camera.intrinsics;
        PinholeCamera::new(k[0], k[1], k[2], k[3])
    }

    /// Translate the allocation section into integrator parameters.
    pub fn integrator_config(&self) -> Result<IntegratorConfig> {
        let strategy = match self.allocation.strategy.as_str() {
            "surface_band" => AllocationStrategy::SurfaceBand,
            "parent" => AllocationStrategy::Parent,
            "dense" => AllocationStrategy::Dense,
            other => bail!("Unknown allocation strategy '{other}'"),
        };
        Ok(IntegratorConfig {
            strategy,
            reserved: self.allocation.reserved,
            band: self.allocation.band,
            doubling_ratio: self.allocation.doubling_ratio,
            min_allocation_size: self.allocation.min_allocation_size,
            max_allocation_size: self.allocation.max_allocation_size,
        })
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            map: MapYaml {
                size: 512,
                dim: 5.12,
            },
            camera: CameraYaml {
                intrinsics: vec![525.0, 525.0, 319.5, 239.5],
                width: 640,
                height: 480,
            },
            allocation: AllocationYaml::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = "
map:
  size: 256
  dim: 2.56
camera:
  intrinsics: [525.0, 525.0, 319.5, 239.5]
  width: 640
  height: 480
allocation:
  strategy: surface_band
  band: 0.2
";
        let config: MappingConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.map.size, 256);
        assert_eq!(
            config.integrator_config().unwrap().strategy,
            AllocationStrategy::SurfaceBand
        );
        // Unset allocation fields fall back to defaults.
        assert_eq!(
            config.allocation.doubling_ratio,
            AllocationYaml::default().doubling_ratio
        );
        assert!((config.allocation.band - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_bad_intrinsics() {
        let yaml = "
map: {size: 64, dim: 0.32}
camera: {intrinsics: [525.0], width: 640, height: 480}
";
        let config: MappingConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        let config = MappingConfig {
            allocation: AllocationYaml {
                strategy: "octomap".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.integrator_config().is_err());
    }
}
