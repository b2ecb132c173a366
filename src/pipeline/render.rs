use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::render::{DrawTransform, RenderBackend};
use crate::rig::{BoneSolver, OrientationStrategy, SharedJoints, SkeletonTopology};

/// Result of one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSummary {
    /// Smoother generation the frame was drawn from.
    pub generation: u64,
    pub tracked_joints: usize,
}

/// Display-rate loop: smoothed joints → bone transforms → backend.
///
/// Only ever reads the shared joints; never waits on detection, so a
/// stalled detector leaves the last pose on screen.
pub struct RenderLoop<B: RenderBackend> {
    backend: B,
    topology: SkeletonTopology,
    joints: SharedJoints,
    solver: BoneSolver,
    joint_handles: Vec<B::Handle>,
    bone_handles: Vec<B::Handle>,
    /// 描画済みフレーム数。App の外からも読めるよう共有する
    frames: Arc<AtomicU64>,
}

impl<B: RenderBackend> RenderLoop<B> {
    pub fn new(
        mut backend: B,
        topology: SkeletonTopology,
        joints: SharedJoints,
        joint_radius: f32,
        bone_radius: f32,
        strategy: OrientationStrategy,
    ) -> Self {
        let joint_handles = (0..topology.joint_count())
            .map(|_| backend.create_sphere(joint_radius))
            .collect();
        let bone_handles = topology
            .bones()
            .iter()
            .map(|_| backend.create_capsule(bone_radius))
            .collect();
        let solver = BoneSolver::for_topology(&topology, strategy);
        Self {
            backend,
            topology,
            joints,
            solver,
            joint_handles,
            bone_handles,
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(
        backend: B,
        topology: SkeletonTopology,
        joints: SharedJoints,
        config: &RenderConfig,
    ) -> Self {
        Self::new(
            backend,
            topology,
            joints,
            config.joint_radius,
            config.bone_radius,
            config.orientation,
        )
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Handle to the frame count that stays readable after the loop is
    /// moved into (and consumed by) the app runner.
    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        self.frames.clone()
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_open()
    }

    pub fn frame(&mut self) -> Result<FrameSummary, RenderError> {
        let snapshot = self.joints.snapshot();

        for (index, &handle) in self.joint_handles.iter().enumerate() {
            let transform = DrawTransform::at(snapshot.position(index));
            self.backend.update(handle, &transform);
        }

        for (index, (bone, &handle)) in self
            .topology
            .bones()
            .iter()
            .zip(self.bone_handles.iter())
            .enumerate()
        {
            let start = snapshot.position(bone.start);
            let end = snapshot.position(bone.end);
            let transform = self.solver.solve(index, &start, &end);
            self.backend.update(handle, &DrawTransform::from(&transform));
        }

        self.backend.present()?;
        self.frames.fetch_add(1, Ordering::Relaxed);

        Ok(FrameSummary {
            generation: snapshot.generation,
            tracked_joints: snapshot.tracked.iter().filter(|t| **t).count(),
        })
    }
}
