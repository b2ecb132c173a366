#[cfg(feature = "desktop")]
pub mod detector;
pub mod keypoint;
#[cfg(feature = "desktop")]
pub mod preprocess;
pub mod source;

#[cfg(feature = "desktop")]
pub use detector::MoveNetDetector;
pub use keypoint::{DetectionFrame, Keypoint, KeypointIndex};
#[cfg(feature = "desktop")]
pub use preprocess::preprocess_for_movenet;
pub use source::{CaptureSource, KeypointSource};
