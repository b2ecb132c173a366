#[cfg(feature = "desktop")]
pub mod capture;

#[cfg(feature = "desktop")]
pub use capture::{FrameFeed, OpenCvCamera, ThreadedCamera};
