use nalgebra::{Isometry3, Perspective3, Point3, Vector3};

use crate::config::RenderConfig;

const Z_NEAR: f32 = 0.1;
const Z_FAR: f32 = 1000.0;

/// The camera must sit beyond the near-plane clip margin in front of the origin.
pub const MIN_CAMERA_DISTANCE: f32 = 0.5;

/// Perspective camera on +Z looking at the origin, +Y up.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    width: usize,
    height: usize,
    camera_distance: f32,
    view: Isometry3<f32>,
    projection: Perspective3<f32>,
    /// tan(fov_y / 2)
    half_fov_tan: f32,
}

impl Viewport {
    pub fn new(width: usize, height: usize, fov_y_deg: f32, camera_distance: f32) -> Self {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        let fov_y = fov_y_deg.to_radians();
        let eye = Point3::new(0.0, 0.0, camera_distance);
        let view = Isometry3::look_at_rh(&eye, &Point3::origin(), &Vector3::y());
        Self {
            width,
            height,
            camera_distance,
            view,
            projection: Perspective3::new(aspect, fov_y, Z_NEAR, Z_FAR),
            half_fov_tan: (fov_y * 0.5).tan(),
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(
            config.width,
            config.height,
            config.fov_y_deg,
            config.camera_distance,
        )
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// 視点からの奥行き。カメラの後ろ、または near/far の外なら None
    fn depth(&self, point: &Vector3<f32>) -> Option<f32> {
        let eye_space = self.view.transform_point(&Point3::from(*point));
        let depth = -eye_space.z;
        (Z_NEAR..=Z_FAR).contains(&depth).then_some(depth)
    }

    /// World point to pixel coordinates. May land outside the buffer.
    pub fn project(&self, point: &Vector3<f32>) -> Option<(i32, i32)> {
        self.depth(point)?;
        let eye_space = self.view.transform_point(&Point3::from(*point));
        let ndc = self.projection.project_point(&eye_space);
        let x = (ndc.x + 1.0) * 0.5 * self.width as f32;
        let y = (1.0 - ndc.y) * 0.5 * self.height as f32;
        Some((x.round() as i32, y.round() as i32))
    }

    /// Part of segment `a`–`b` in front of the near plane.
    pub fn clip_segment(
        &self,
        a: &Vector3<f32>,
        b: &Vector3<f32>,
    ) -> Option<(Vector3<f32>, Vector3<f32>)> {
        // カメラは +Z 上にあるので奥行きは z だけで決まる
        let max_z = self.camera_distance - Z_NEAR * 2.0;
        match (a.z <= max_z, b.z <= max_z) {
            (true, true) => Some((*a, *b)),
            (false, false) => None,
            (a_in, _) => {
                let t = (max_z - a.z) / (b.z - a.z);
                let cut = a + (b - a) * t;
                if a_in {
                    Some((*a, cut))
                } else {
                    Some((cut, *b))
                }
            }
        }
    }

    /// On-screen radius of a world-space radius at `point`.
    ///
    /// Clamped to `[1, max(width, height)]`; a larger disc covers the view anyway.
    pub fn pixel_radius(&self, point: &Vector3<f32>, radius: f32) -> Option<i32> {
        let depth = self.depth(point)?;
        let pixels = radius / (depth * self.half_fov_tan) * self.height as f32 * 0.5;
        if pixels.is_nan() {
            return None;
        }
        let max = self.width.max(self.height).max(1) as f32;
        Some(pixels.round().clamp(1.0, max) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Viewport {
        Viewport::new(640, 480, 75.0, 5.0)
    }

    #[test]
    fn test_origin_projects_to_center() {
        assert_eq!(viewport().project(&Vector3::zeros()), Some((320, 240)));
    }

    #[test]
    fn test_up_is_up_and_right_is_right() {
        let vp = viewport();
        let (_, y_up) = vp.project(&Vector3::new(0.0, 1.0, 0.0)).unwrap();
        let (x_right, _) = vp.project(&Vector3::new(1.0, 0.0, 0.0)).unwrap();
        assert!(y_up < 240);
        assert!(x_right > 320);
    }

    #[test]
    fn test_point_behind_camera_is_culled() {
        let vp = viewport();
        assert_eq!(vp.project(&Vector3::new(0.0, 0.0, 10.0)), None);
        assert_eq!(vp.pixel_radius(&Vector3::new(0.0, 0.0, 10.0), 0.05), None);
    }

    #[test]
    fn test_pixel_radius_grows_when_closer() {
        let vp = viewport();
        let far = vp.pixel_radius(&Vector3::new(0.0, 0.0, -5.0), 0.05).unwrap();
        let near = vp.pixel_radius(&Vector3::new(0.0, 0.0, 3.0), 0.05).unwrap();
        assert!(near > far);
        assert!(far >= 1);
    }

    #[test]
    fn test_pixel_radius_is_clamped_to_view() {
        let vp = viewport();
        // near 面付近の巨大な球
        let huge = vp.pixel_radius(&Vector3::new(0.0, 0.0, 4.85), 100.0).unwrap();
        assert_eq!(huge, 640);
        assert!(vp.pixel_radius(&Vector3::zeros(), f32::NAN).is_none());
        assert_eq!(vp.pixel_radius(&Vector3::zeros(), 0.0), Some(1));
    }

    #[test]
    fn test_clip_segment_through_camera_plane() {
        let vp = viewport();
        let a = Vector3::new(0.0, 0.0, -5.0);
        let b = Vector3::new(0.0, 0.0, 10.0);
        let (start, end) = vp.clip_segment(&a, &b).unwrap();
        assert_eq!(start, a);
        assert!(end.z < 5.0);
        assert!(vp.project(&end).is_some());

        assert!(vp.clip_segment(&b, &Vector3::new(1.0, 0.0, 8.0)).is_none());
    }

    #[test]
    fn test_projection_matches_field_of_view() {
        // 画角 90°、距離 1 なら y = 1 が画面上端
        let vp = Viewport::new(100, 100, 90.0, 1.0);
        let (_, y) = vp.project(&Vector3::new(0.0, 1.0, 0.0)).unwrap();
        assert_eq!(y, 0);
    }
}
