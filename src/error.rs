//! Error types for the rig pipeline.

use thiserror::Error;

/// Recoverable failure of a single keypoint estimation call.
///
/// Distinct from "no subject found", which is an empty (successful) result.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// The detector is not loaded or refused the request.
    #[error("detector unavailable: {0}")]
    Unavailable(String),

    /// Model inference failed.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The model produced output of an unexpected shape.
    #[error("invalid detector output: {0}")]
    InvalidOutput(String),
}

impl DetectionError {
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    #[must_use]
    pub fn inference(reason: impl Into<String>) -> Self {
        Self::Inference(reason.into())
    }

    #[must_use]
    pub fn invalid_output(reason: impl Into<String>) -> Self {
        Self::InvalidOutput(reason.into())
    }
}

/// Video capture failure. Fatal to the whole pipeline.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device could not be opened.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device stopped delivering frames.
    #[error("capture device lost: {0}")]
    DeviceLost(String),
}

impl CaptureError {
    #[must_use]
    pub fn device_unavailable(reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable(reason.into())
    }

    #[must_use]
    pub fn device_lost(reason: impl Into<String>) -> Self {
        Self::DeviceLost(reason.into())
    }
}

/// Invalid skeleton topology table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// A topology needs at least one joint.
    #[error("topology has no joints")]
    NoJoints,

    /// A bone references a joint index outside `0..joint_count`.
    #[error("bone {bone} references joint {joint}, but the model has {joint_count} joints")]
    JointOutOfRange {
        bone: usize,
        joint: usize,
        joint_count: usize,
    },

    /// A bone connects a joint to itself.
    #[error("bone {bone} connects joint {joint} to itself")]
    SelfLoop { bone: usize, joint: usize },

    /// Unknown preset name.
    #[error("unknown topology preset: {0}")]
    UnknownPreset(String),
}

/// Configuration value out of range.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl ConfigError {
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Render backend failure.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render backend error: {0}")]
    Backend(String),
}

impl RenderError {
    #[must_use]
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend(reason.into())
    }
}

/// Fatal pipeline failure, surfaced to the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The keypoint worker thread exited while the loop was still running.
    #[error("keypoint worker stopped unexpectedly")]
    WorkerStopped,

    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Render(#[from] RenderError),
}
