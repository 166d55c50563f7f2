use anyhow::Result;
use nalgebra::Vector3;
use tracing::{debug, info, warn};

use rust_densemap::geometry::SE3;
use rust_densemap::io::{DepthImage, MappingConfig, TumDataset};
use rust_densemap::map::Octree;
use rust_densemap::system::{DepthFrameMsg, MappingSystem};

fn main() -> Result<()> {
    // Initialize tracing subscriber with environment filter
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/mapping.yaml".to_string());
    let dataset_path = std::env::args().nth(2);

    let config = MappingConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(
            "Could not load {}: {}. Using the default configuration.",
            config_path, e
        );
        MappingConfig::default()
    });
    debug!("Map: {} voxels over {} m", config.map.size, config.map.dim);
    debug!("Camera intrinsics: {:?}", config.camera.intrinsics);

    let map = Octree::new(config.map.size, config.map.dim)?;
    let camera = config.pinhole_camera()?;
    let mut system = MappingSystem::new(map, camera, config.integrator_config()?);

    match dataset_path {
        Some(path) => replay_tum(&system, &path)?,
        None => synthetic_sweep(&system, &config)?,
    }

    // Shutdown cleanly (joins the mapping thread)
    system.shutdown();

    let shared = system.shared_state();
    let map = shared.map.read();
    info!(
        "Done! {} frames integrated ({} truncated), {} octree nodes",
        shared.frames_integrated(),
        shared.frames_truncated(),
        map.node_count()
    );

    Ok(())
}

/// Replay a TUM RGB-D sequence, posing frames with ground truth when the
/// sequence carries it.
fn replay_tum(system: &MappingSystem, path: &str) -> Result<()> {
    let dataset = TumDataset::new(path)?;
    info!(
        "Loaded {} depth frames, {} ground truth entries",
        dataset.len(),
        dataset.groundtruth.len()
    );

    for i in 0..dataset.len() {
        let entry = &dataset.depth_entries[i];
        let timestamp_s = entry.timestamp_s;
        let depth = dataset.depth_image(i)?;
        let t_wc = dataset
            .pose_near(timestamp_s)
            .copied()
            .unwrap_or_else(SE3::identity);

        system.submit_frame(DepthFrameMsg {
            timestamp_s,
            t_wc,
            depth,
        })?;

        if i % 100 == 0 {
            let shared = system.shared_state();
            info!(
                "Frame {}/{}: {} integrated, {} octree nodes",
                i,
                dataset.len(),
                shared.frames_integrated(),
                shared.map.read().node_count()
            );
        }
    }
    Ok(())
}

/// Sweep a synthetic fronto-parallel plane through the map, the smallest
/// input that exercises the full allocation path.
fn synthetic_sweep(system: &MappingSystem, config: &MappingConfig) -> Result<()> {
    info!("No dataset given; sweeping a synthetic depth plane");
    let (width, height) = (config.camera.width, config.camera.height);
    let half_dim = config.map.dim / 2.0;
    let t_wc = SE3 {
        rotation: nalgebra::UnitQuaternion::identity(),
        translation: Vector3::new(half_dim, half_dim, 0.0),
    };

    let frames = 30;
    for i in 0..frames {
        let plane_depth = config.map.dim * (0.4 + 0.4 * i as f32 / frames as f32);
        system.submit_frame(DepthFrameMsg {
            timestamp_s: i as f64 / 30.0,
            t_wc,
            depth: DepthImage::constant(width, height, plane_depth),
        })?;
    }
    Ok(())
}
