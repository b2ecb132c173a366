pub mod app;
pub mod detection;
pub mod render;

pub use app::{build_render_app, RenderStats, StopSignal};
pub use detection::{
    apply_detection, DetectionLoop, DetectionMode, DetectionStats, LoopState, TickOutcome,
};
pub use render::{FrameSummary, RenderLoop};

use bevy::app::ScheduleRunnerPlugin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{ConfigError, PipelineError};
use crate::pose::{CaptureSource, KeypointSource};
use crate::render::RenderBackend;
use crate::rig::{CoordinateMapper, JointSmoother, SharedJoints, SkeletonTopology};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub detection: DetectionStats,
    pub frames: u64,
}

/// One parameterized pipeline: shared joint state plus both loops.
pub struct Pipeline {
    config: Config,
    topology: SkeletonTopology,
    joints: SharedJoints,
    stop: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let topology = config.topology.build()?;
        let smoother = JointSmoother::from_config(topology.joint_count(), &config.smoothing);
        Ok(Self {
            config,
            topology,
            joints: SharedJoints::new(smoother),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn topology(&self) -> &SkeletonTopology {
        &self.topology
    }

    pub fn joints(&self) -> &SharedJoints {
        &self.joints
    }

    /// Raising this flag stops both loops.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// SIGINT / SIGTERM raise the stop flag.
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        signal_hook::flag::register(signal_hook::consts::SIGINT, self.stop.clone())?;
        signal_hook::flag::register(signal_hook::consts::SIGTERM, self.stop.clone())?;
        Ok(())
    }

    pub fn detection_loop<C, S>(&self, capture: C, source: S) -> Result<DetectionLoop<C>, PipelineError>
    where
        C: CaptureSource,
        S: KeypointSource<C::Frame> + 'static,
    {
        DetectionLoop::new(
            capture,
            source,
            CoordinateMapper::from_config(&self.config.mapping),
            self.joints.clone(),
            &self.config.detection,
        )
    }

    pub fn render_loop<B: RenderBackend>(&self, backend: B) -> RenderLoop<B> {
        RenderLoop::from_config(
            backend,
            self.topology.clone(),
            self.joints.clone(),
            &self.config.render,
        )
    }

    /// Runs detection on its own thread and rendering on the calling thread
    /// until the stop flag is raised, the backend closes, or capture fails.
    pub fn run<C, S, B>(self, capture: C, source: S, backend: B) -> Result<RunSummary, PipelineError>
    where
        C: CaptureSource + Send + 'static,
        S: KeypointSource<C::Frame> + 'static,
        B: RenderBackend + 'static,
    {
        let detection = self.detection_loop(capture, source)?.spawn(self.stop.clone())?;

        let frame_duration = Duration::from_secs_f64(1.0 / self.config.render.target_fps as f64);
        let render_loop = self.render_loop(backend);
        // App::run は App 本体をランナーへ渡すので、終了後は world から読めない
        let frames = render_loop.frame_counter();
        let mut app = build_render_app(render_loop, self.stop.clone());
        app.add_plugins(ScheduleRunnerPlugin::run_loop(frame_duration));
        app.run();

        self.stop.store(true, Ordering::Release);
        let frames = frames.load(Ordering::Relaxed);

        let detection = match detection.join() {
            Ok(result) => result?,
            Err(_) => return Err(PipelineError::WorkerStopped),
        };
        Ok(RunSummary { detection, frames })
    }
}
