use nalgebra::Vector3;

use crate::config::MappingConfig;
use crate::pose::Keypoint;

/// Maps detector pixel coordinates into the rig's render space.
///
/// Render space is centred on the origin, +Y up, spanning `render_span`
/// units on both axes, z = 0. Stateless.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    confidence_threshold: f32,
    render_span: f32,
    mirror: bool,
    lateral_offset: f32,
}

impl CoordinateMapper {
    pub fn new(confidence_threshold: f32, render_span: f32, mirror: bool, lateral_offset: f32) -> Self {
        Self {
            confidence_threshold,
            render_span,
            mirror,
            lateral_offset,
        }
    }

    pub fn from_config(config: &MappingConfig) -> Self {
        Self::new(
            config.confidence_threshold,
            config.render_span,
            config.mirror,
            config.lateral_offset,
        )
    }

    pub fn render_span(&self) -> f32 {
        self.render_span
    }

    /// Scores at or below the threshold count as absent.
    pub fn accepts(&self, score: f32) -> bool {
        score.is_finite() && score > self.confidence_threshold
    }

    /// Pixel → render space, before mirror and offset.
    pub fn normalize(&self, x: f32, y: f32, width: u32, height: u32) -> Vector3<f32> {
        let r = self.render_span;
        let nx = (x / width as f32) * r - r / 2.0;
        let ny = -(y / height as f32) * r + r / 2.0;
        Vector3::new(nx, ny, 0.0)
    }

    /// Full mapping of one keypoint, `None` when the joint is absent.
    pub fn map(&self, keypoint: &Keypoint, width: u32, height: u32) -> Option<Vector3<f32>> {
        if !self.accepts(keypoint.score) {
            return None;
        }
        if width == 0 || height == 0 || !keypoint.x.is_finite() || !keypoint.y.is_finite() {
            return None;
        }

        let mut p = self.normalize(keypoint.x, keypoint.y, width, height);
        if self.mirror {
            p.x = -p.x;
        }
        p.x += self.lateral_offset;
        Some(p)
    }
}

impl Default for CoordinateMapper {
    fn default() -> Self {
        Self::from_config(&MappingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_center_of_frame_maps_to_origin() {
        let mapper = CoordinateMapper::default();
        let p = mapper.map(&Keypoint::new(0, 320.0, 240.0, 0.9), 640, 480).unwrap();
        assert!(approx_eq(p.x, 0.0));
        assert!(approx_eq(p.y, 0.0));
        assert_eq!(p.z, 0.0);
    }

    #[test]
    fn test_upper_middle_point() {
        let mapper = CoordinateMapper::new(0.5, 4.0, false, 0.0);
        let p = mapper.map(&Keypoint::new(5, 100.0, 25.0, 0.9), 200, 100).unwrap();
        assert!(approx_eq(p.x, 0.0));
        assert!(approx_eq(p.y, 1.0));

        // 縦方向の中央は y = 0
        let p = mapper.map(&Keypoint::new(5, 100.0, 50.0, 0.9), 200, 100).unwrap();
        assert!(approx_eq(p.y, 0.0));
    }

    #[test]
    fn test_top_left_corner_is_up_left() {
        let mapper = CoordinateMapper::default();
        let p = mapper.map(&Keypoint::new(0, 0.0, 0.0, 0.9), 640, 480).unwrap();
        assert!(approx_eq(p.x, -2.0));
        assert!(approx_eq(p.y, 2.0));
    }

    #[test]
    fn test_low_confidence_is_absent() {
        let mapper = CoordinateMapper::default();
        for &score in &[0.0, 0.1, 0.3, 0.49, 0.5] {
            let kp = Keypoint::new(0, 100.0, 100.0, score);
            assert!(mapper.map(&kp, 640, 480).is_none(), "score {} should be absent", score);
        }
        assert!(mapper.map(&Keypoint::new(0, 100.0, 100.0, 0.51), 640, 480).is_some());
    }

    #[test]
    fn test_nan_inputs_are_absent() {
        let mapper = CoordinateMapper::default();
        assert!(mapper.map(&Keypoint::new(0, f32::NAN, 1.0, 0.9), 640, 480).is_none());
        assert!(mapper.map(&Keypoint::new(0, 1.0, 1.0, f32::NAN), 640, 480).is_none());
    }

    #[test]
    fn test_zero_sized_frame_is_absent() {
        let mapper = CoordinateMapper::default();
        assert!(mapper.map(&Keypoint::new(0, 1.0, 1.0, 0.9), 0, 480).is_none());
    }

    #[test]
    fn test_output_within_span() {
        let mapper = CoordinateMapper::new(0.5, 4.0, false, 0.0);
        let (w, h) = (640u32, 480u32);
        let half = mapper.render_span() / 2.0 + 1e-5;
        for i in 0..=16 {
            for j in 0..=12 {
                let x = w as f32 * i as f32 / 16.0;
                let y = h as f32 * j as f32 / 12.0;
                let p = mapper.map(&Keypoint::new(0, x, y, 1.0), w, h).unwrap();
                assert!(p.x.abs() <= half && p.y.abs() <= half, "({}, {}) -> {:?}", x, y, p);
            }
        }
    }

    #[test]
    fn test_mirror_then_offset() {
        let mapper = CoordinateMapper::new(0.5, 4.0, true, -1.5);
        // x=160/640 → -1.0, mirror → 1.0, offset → -0.5
        let p = mapper.map(&Keypoint::new(0, 160.0, 240.0, 0.9), 640, 480).unwrap();
        assert!(approx_eq(p.x, -0.5));
        assert!(approx_eq(p.y, 0.0));
    }
}
