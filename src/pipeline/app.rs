//! bevy schedule driving the render loop at display rate.

use bevy::app::{App, AppExit, Update};
use bevy::ecs::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::render::{FrameSummary, RenderLoop};
use crate::render::RenderBackend;

/// Shared run flag for both loops.
#[derive(Resource, Clone)]
pub struct StopSignal(pub Arc<AtomicBool>);

impl StopSignal {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Resource)]
pub struct RenderStats {
    pub last: Option<FrameSummary>,
    window_frames: u32,
    window_start_generation: u64,
    timer: Instant,
}

impl Default for RenderStats {
    fn default() -> Self {
        Self {
            last: None,
            window_frames: 0,
            window_start_generation: 0,
            timer: Instant::now(),
        }
    }
}

fn render_system<B: RenderBackend + 'static>(
    mut render: NonSendMut<RenderLoop<B>>,
    stop: Res<StopSignal>,
    mut stats: ResMut<RenderStats>,
) {
    match render.frame() {
        Ok(summary) => {
            stats.window_frames += 1;
            stats.last = Some(summary);
        }
        Err(e) => {
            tracing::error!("render failed: {}", e);
            stop.raise();
        }
    }
}

fn fps_system(mut stats: ResMut<RenderStats>) {
    let elapsed = stats.timer.elapsed().as_secs_f32();
    if elapsed < 1.0 {
        return;
    }
    let generation = stats.last.map_or(0, |s| s.generation);
    let detections = generation.saturating_sub(stats.window_start_generation);
    let tracked = stats.last.map_or(0, |s| s.tracked_joints);
    tracing::info!(
        "FPS: {:.1} (detect: {:.1}/s) | tracked joints: {}",
        stats.window_frames as f32 / elapsed,
        detections as f32 / elapsed,
        tracked,
    );
    stats.window_frames = 0;
    stats.window_start_generation = generation;
    stats.timer = Instant::now();
}

fn stop_system<B: RenderBackend + 'static>(
    render: NonSend<RenderLoop<B>>,
    stop: Res<StopSignal>,
    mut exit: EventWriter<AppExit>,
) {
    if !render.is_open() {
        stop.raise();
    }
    if stop.is_raised() {
        exit.send(AppExit::Success);
    }
}

/// Builds the render app without a runner.
///
/// Callers add `ScheduleRunnerPlugin::run_loop` for real-time use, or call
/// `App::update` directly.
pub fn build_render_app<B: RenderBackend + 'static>(
    render_loop: RenderLoop<B>,
    stop: Arc<AtomicBool>,
) -> App {
    let mut app = App::new();
    app.insert_non_send_resource(render_loop)
        .insert_resource(StopSignal(stop))
        .insert_resource(RenderStats::default())
        .add_systems(
            Update,
            (render_system::<B>, fps_system, stop_system::<B>).chain(),
        );
    app
}
