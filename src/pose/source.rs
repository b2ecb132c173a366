use crate::error::{CaptureError, DetectionError};

use super::keypoint::Keypoint;

/// Pose-estimation model seen as a black box.
///
/// `Ok(vec![])` means no subject was found; `Err` is a detector failure.
/// Runs on the keypoint worker thread, so it may block for as long as
/// inference takes.
pub trait KeypointSource<F>: Send {
    fn estimate(&mut self, frame: &F) -> Result<Vec<Keypoint>, DetectionError>;
}

impl<F, S: KeypointSource<F> + ?Sized> KeypointSource<F> for Box<S> {
    fn estimate(&mut self, frame: &F) -> Result<Vec<Keypoint>, DetectionError> {
        (**self).estimate(frame)
    }
}

/// Video source feeding the detection loop.
pub trait CaptureSource {
    type Frame: Send + 'static;

    /// Current frame size in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Latest frame, `Ok(None)` until the first one arrives.
    /// An error means the device is gone and the pipeline must stop.
    fn latest_frame(&mut self) -> Result<Option<Self::Frame>, CaptureError>;
}
