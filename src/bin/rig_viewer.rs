//! Webcam → MoveNet → smoothed 3D rig drawn over the live video.
//!
//! Usage: `rig_viewer [config.toml]` (default `rig.toml`, built-in defaults if missing)

use anyhow::{Context, Result};

use pose_rig::camera::ThreadedCamera;
use pose_rig::config::Config;
use pose_rig::logging::init_logging;
use pose_rig::pipeline::Pipeline;
use pose_rig::pose::MoveNetDetector;
use pose_rig::render::MinifbRenderer;

const DEFAULT_CONFIG_PATH: &str = "rig.toml";

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let (config, load_error) = Config::load_or_default(&config_path);
    let log_path = init_logging(&config.log)?;
    if let Some(e) = load_error {
        tracing::warn!("{:#}; using default configuration", e);
    }

    tracing::info!("Rig Viewer {}", env!("GIT_VERSION"));
    tracing::info!("Config: {}", config_path);
    tracing::info!("Log file: {}", log_path.display());
    tracing::info!(
        "Detection: {:?} every {} ms | render: {} fps, {:?}",
        config.detection.mode,
        config.detection.interval_ms,
        config.render.target_fps,
        config.render.orientation,
    );

    let pipeline = Pipeline::new(config).context("Invalid configuration")?;
    pipeline
        .install_signal_handlers()
        .context("Failed to install signal handlers")?;
    let config = pipeline.config();
    tracing::info!(
        "Topology: {} joints, {} bones",
        pipeline.topology().joint_count(),
        pipeline.topology().bones().len()
    );

    let camera = ThreadedCamera::from_config(&config.camera)?;
    let (w, h) = camera.resolution();
    tracing::info!("Camera {}: {}x{}", config.camera.index, w, h);

    let detector = MoveNetDetector::from_config(&config.model)
        .with_context(|| format!("Failed to load model {}", config.model.path.display()))?;
    tracing::info!("Model: {}", config.model.path.display());

    let renderer = MinifbRenderer::new("Rig Viewer - ESC to exit", &config.render)?
        .with_background(camera.frame_feed());

    let summary = pipeline.run(camera, detector, renderer)?;
    tracing::info!(
        "Stopped after {} frames | detection: {} requests, {} applied, {} empty, {} failed",
        summary.frames,
        summary.detection.requests,
        summary.detection.applied,
        summary.detection.empty,
        summary.detection.failures,
    );
    Ok(())
}
