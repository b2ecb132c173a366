pub mod backend;
pub mod software;
pub mod viewport;
#[cfg(feature = "desktop")]
pub mod window;

pub use backend::{DrawTransform, RenderBackend};
pub use software::{GridSettings, PrimitiveId, Shape, SoftwareRenderer};
pub use viewport::Viewport;
#[cfg(feature = "desktop")]
pub use window::MinifbRenderer;
