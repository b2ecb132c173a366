use nalgebra::{UnitQuaternion, Vector3};

use crate::error::RenderError;
use crate::rig::BoneTransform;

/// Position / scale / orientation of one persistent drawable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawTransform {
    pub position: Vector3<f32>,
    pub scale: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
}

impl DrawTransform {
    /// Unscaled, unrotated primitive at `position` (joint spheres).
    pub fn at(position: Vector3<f32>) -> Self {
        Self {
            position,
            scale: Vector3::new(1.0, 1.0, 1.0),
            orientation: UnitQuaternion::identity(),
        }
    }
}

impl From<&BoneTransform> for DrawTransform {
    /// Unit-height capsule stretched along local +Y.
    fn from(bone: &BoneTransform) -> Self {
        Self {
            position: bone.midpoint,
            scale: bone.scale(),
            orientation: bone.orientation,
        }
    }
}

/// 3D scene seen as a black box: create primitives once, move them every frame.
///
/// Camera and lights are the backend's business.
pub trait RenderBackend {
    type Handle: Copy + 'static;

    /// Sphere of `radius` centred on the handle's position.
    fn create_sphere(&mut self, radius: f32) -> Self::Handle;

    /// Capsule of `radius` and unit height along local +Y.
    fn create_capsule(&mut self, radius: f32) -> Self::Handle;

    fn update(&mut self, handle: Self::Handle, transform: &DrawTransform);

    /// Ends the frame.
    fn present(&mut self) -> Result<(), RenderError>;

    /// `false` once the user closed the output.
    fn is_open(&self) -> bool {
        true
    }
}
