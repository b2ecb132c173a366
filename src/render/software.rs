//! CPU rasterizer for the rig: joints as filled circles, bones as thick lines.

use nalgebra::Vector3;

use super::backend::{DrawTransform, RenderBackend};
use super::viewport::Viewport;
use crate::config::RenderConfig;
use crate::error::RenderError;

/// 関節の色 (RGB)
pub const JOINT_COLOR: u32 = 0x00FF00;
/// ボーンの色 (RGB)
pub const BONE_COLOR: u32 = 0xFFFF00;
/// 床グリッドの色 (RGB)
pub const GRID_COLOR: u32 = 0x404040;
pub const CLEAR_COLOR: u32 = 0x000000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveId(usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Sphere { radius: f32 },
    Capsule { radius: f32 },
}

#[derive(Debug, Clone, Copy)]
struct Primitive {
    shape: Shape,
    transform: Option<DrawTransform>,
}

#[derive(Debug, Clone, Copy)]
pub struct GridSettings {
    /// 一辺の長さ
    pub size: f32,
    pub divisions: u32,
}

/// Draws into an owned `0RGB` buffer. `present` rasterizes the scene;
/// the buffer is then ready to be shown by a window.
pub struct SoftwareRenderer {
    viewport: Viewport,
    buffer: Vec<u32>,
    background: Option<Vec<u32>>,
    grid: Option<GridSettings>,
    primitives: Vec<Primitive>,
    frames: u64,
}

impl SoftwareRenderer {
    pub fn new(viewport: Viewport, grid: Option<GridSettings>) -> Self {
        let len = viewport.width() * viewport.height();
        Self {
            viewport,
            buffer: vec![CLEAR_COLOR; len],
            background: None,
            grid,
            primitives: Vec::new(),
            frames: 0,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        let grid = config.show_grid.then_some(GridSettings {
            size: config.grid_size,
            divisions: config.grid_divisions,
        });
        Self::new(Viewport::from_config(config), grid)
    }

    pub fn width(&self) -> usize {
        self.viewport.width()
    }

    pub fn height(&self) -> usize {
        self.viewport.height()
    }

    pub fn buffer(&self) -> &[u32] {
        &self.buffer
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn shape(&self, id: PrimitiveId) -> Option<Shape> {
        self.primitives.get(id.0).map(|p| p.shape)
    }

    /// Last transform given to `id`, `None` before its first update.
    pub fn transform(&self, id: PrimitiveId) -> Option<DrawTransform> {
        self.primitives.get(id.0).and_then(|p| p.transform)
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<u32> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        self.buffer.get(y * self.width() + x).copied()
    }

    /// Video frame drawn behind the rig, nearest-neighbour scaled to the view.
    ///
    /// `pixels` is `0RGB`, row-major, `width * height` long.
    pub fn set_background(&mut self, pixels: &[u32], width: usize, height: usize) {
        if width == 0 || height == 0 || pixels.len() < width * height {
            tracing::warn!("ignoring background frame {}x{} ({} px)", width, height, pixels.len());
            return;
        }
        let (w, h) = (self.width(), self.height());
        let mut scaled = Vec::with_capacity(w * h);
        for y in 0..h {
            let sy = y * height / h.max(1);
            for x in 0..w {
                let sx = x * width / w.max(1);
                scaled.push(pixels[sy * width + sx]);
            }
        }
        self.background = Some(scaled);
    }

    fn push(&mut self, shape: Shape) -> PrimitiveId {
        self.primitives.push(Primitive {
            shape,
            transform: None,
        });
        PrimitiveId(self.primitives.len() - 1)
    }

    fn draw_scene(&mut self) {
        match &self.background {
            Some(bg) => self.buffer.copy_from_slice(bg),
            None => self.buffer.fill(CLEAR_COLOR),
        }
        if let Some(grid) = self.grid {
            self.draw_grid(grid);
        }

        // ボーンを先に描いて関節を上に重ねる
        let primitives = std::mem::take(&mut self.primitives);
        for p in primitives.iter() {
            if let (Shape::Capsule { radius }, Some(t)) = (p.shape, p.transform) {
                self.draw_capsule(&t, radius);
            }
        }
        for p in primitives.iter() {
            if let (Shape::Sphere { radius }, Some(t)) = (p.shape, p.transform) {
                self.draw_sphere(&t, radius);
            }
        }
        self.primitives = primitives;
    }

    /// XZ 平面 (y = 0) の床グリッド
    fn draw_grid(&mut self, grid: GridSettings) {
        let divisions = grid.divisions.max(1);
        let half = grid.size * 0.5;
        let step = grid.size / divisions as f32;
        for i in 0..=divisions {
            let t = -half + step * i as f32;
            self.draw_world_line(
                &Vector3::new(t, 0.0, -half),
                &Vector3::new(t, 0.0, half),
                1,
                GRID_COLOR,
            );
            self.draw_world_line(
                &Vector3::new(-half, 0.0, t),
                &Vector3::new(half, 0.0, t),
                1,
                GRID_COLOR,
            );
        }
    }

    fn draw_sphere(&mut self, t: &DrawTransform, radius: f32) {
        let Some((x, y)) = self.viewport.project(&t.position) else {
            return;
        };
        let Some(r) = self.viewport.pixel_radius(&t.position, radius * t.scale.x) else {
            return;
        };
        self.draw_circle(x, y, r, JOINT_COLOR);
    }

    /// 端点 = 中点 ± 回転 · (0, 長さ/2, 0)
    fn draw_capsule(&mut self, t: &DrawTransform, radius: f32) {
        let half = t.orientation * Vector3::new(0.0, t.scale.y * 0.5, 0.0);
        let start = t.position - half;
        let end = t.position + half;
        let width = self
            .viewport
            .pixel_radius(&t.position, radius * t.scale.x)
            .unwrap_or(1);
        self.draw_world_line(&start, &end, width, BONE_COLOR);
    }

    fn draw_world_line(&mut self, a: &Vector3<f32>, b: &Vector3<f32>, radius: i32, color: u32) {
        let Some((a, b)) = self.viewport.clip_segment(a, b) else {
            return;
        };
        if let (Some((x0, y0)), Some((x1, y1))) = (self.viewport.project(&a), self.viewport.project(&b)) {
            self.draw_thick_line(x0, y0, x1, y1, radius, color);
        }
    }

    /// 太さ付きの線。Bresenham の各点に円を打つ
    fn draw_thick_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, radius: i32, color: u32) {
        if radius <= 1 {
            self.draw_line(x0, y0, x1, y1, |this, x, y| this.set_pixel(x, y, color));
        } else {
            self.draw_line(x0, y0, x1, y1, |this, x, y| this.draw_circle(x, y, radius, color));
        }
    }

    /// Bresenhamのアルゴリズムで線を辿る
    fn draw_line(
        &mut self,
        x0: i32,
        y0: i32,
        x1: i32,
        y1: i32,
        mut plot: impl FnMut(&mut Self, i32, i32),
    ) {
        // 画面外へ極端に伸びた線は辿らない
        let limit = 4 * (self.width() + self.height()) as i32;
        if [x0, y0, x1, y1].iter().any(|v| v.abs() > limit) {
            return;
        }

        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        let mut x = x0;
        let mut y = y0;

        loop {
            plot(self, x, y);

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// 円を描画（塗りつぶし）
    fn draw_circle(&mut self, cx: i32, cy: i32, radius: i32, color: u32) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.set_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: u32) {
        let (w, h) = (self.width() as i32, self.height() as i32);
        if x >= 0 && x < w && y >= 0 && y < h {
            self.buffer[(y * w + x) as usize] = color;
        }
    }
}

impl RenderBackend for SoftwareRenderer {
    type Handle = PrimitiveId;

    fn create_sphere(&mut self, radius: f32) -> PrimitiveId {
        self.push(Shape::Sphere { radius })
    }

    fn create_capsule(&mut self, radius: f32) -> PrimitiveId {
        self.push(Shape::Capsule { radius })
    }

    fn update(&mut self, handle: PrimitiveId, transform: &DrawTransform) {
        match self.primitives.get_mut(handle.0) {
            Some(p) => p.transform = Some(*transform),
            None => tracing::warn!("update for unknown primitive {:?}", handle),
        }
    }

    fn present(&mut self) -> Result<(), RenderError> {
        self.draw_scene();
        self.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::{solve_bone, OrientationStrategy};

    fn renderer() -> SoftwareRenderer {
        SoftwareRenderer::new(Viewport::new(640, 480, 75.0, 5.0), None)
    }

    #[test]
    fn test_handles_are_distinct() {
        let mut r = renderer();
        let a = r.create_sphere(0.05);
        let b = r.create_capsule(0.02);
        assert_ne!(a, b);
        assert_eq!(r.primitive_count(), 2);
        assert_eq!(r.shape(a), Some(Shape::Sphere { radius: 0.05 }));
        assert_eq!(r.transform(b), None);
    }

    #[test]
    fn test_joint_drawn_at_projection() {
        let mut r = renderer();
        let joint = r.create_sphere(0.05);
        r.update(joint, &DrawTransform::at(Vector3::zeros()));
        r.present().unwrap();
        assert_eq!(r.pixel(320, 240), Some(JOINT_COLOR));
        assert_eq!(r.pixel(0, 0), Some(CLEAR_COLOR));
        assert_eq!(r.frames(), 1);
    }

    #[test]
    fn test_vertical_bone_drawn_between_endpoints() {
        let mut r = renderer();
        let bone = r.create_capsule(0.02);
        let t = solve_bone(
            &Vector3::new(0.0, 1.0, 0.0),
            &Vector3::new(0.0, -1.0, 0.0),
            OrientationStrategy::ShortestArc,
        )
        .unwrap();
        r.update(bone, &DrawTransform::from(&t));
        r.present().unwrap();

        let vp = Viewport::new(640, 480, 75.0, 5.0);
        let (_, top) = vp.project(&Vector3::new(0.0, 1.0, 0.0)).unwrap();
        let (_, bottom) = vp.project(&Vector3::new(0.0, -1.0, 0.0)).unwrap();
        assert_eq!(r.pixel(320, ((top + bottom) / 2) as usize), Some(BONE_COLOR));
        assert_eq!(r.pixel(320, (top + 2) as usize), Some(BONE_COLOR));
        assert_eq!(r.pixel(320, (bottom - 2) as usize), Some(BONE_COLOR));
        // 水平方向には伸びない
        assert_eq!(r.pixel(400, 240), Some(CLEAR_COLOR));
    }

    #[test]
    fn test_background_is_scaled_into_view() {
        let mut r = renderer();
        r.set_background(&[0x112233; 4], 2, 2);
        r.present().unwrap();
        assert_eq!(r.pixel(639, 479), Some(0x112233));
        assert_eq!(r.pixel(0, 0), Some(0x112233));
    }

    #[test]
    fn test_oversized_joint_fills_view() {
        let mut r = renderer();
        let joint = r.create_sphere(100.0);
        r.update(joint, &DrawTransform::at(Vector3::new(0.0, 0.0, 4.85)));
        r.present().unwrap();
        assert_eq!(r.pixel(0, 0), Some(JOINT_COLOR));
        assert_eq!(r.pixel(639, 479), Some(JOINT_COLOR));
    }

    #[test]
    fn test_short_background_is_ignored() {
        let mut r = renderer();
        r.set_background(&[0xFFFFFF; 3], 2, 2);
        r.present().unwrap();
        assert_eq!(r.pixel(0, 0), Some(CLEAR_COLOR));
    }

    #[test]
    fn test_grid_drawn_on_floor() {
        let mut r = SoftwareRenderer::new(
            Viewport::new(640, 480, 75.0, 5.0),
            Some(GridSettings {
                size: 10.0,
                divisions: 20,
            }),
        );
        r.present().unwrap();
        let (x, y) = Viewport::new(640, 480, 75.0, 5.0)
            .project(&Vector3::zeros())
            .unwrap();
        assert_eq!(r.pixel(x as usize, y as usize), Some(GRID_COLOR));
    }

    #[test]
    fn test_joints_draw_over_bones() {
        let mut r = renderer();
        let joint = r.create_sphere(0.05);
        let bone = r.create_capsule(0.02);
        r.update(joint, &DrawTransform::at(Vector3::zeros()));
        let t = solve_bone(
            &Vector3::new(-1.0, 0.0, 0.0),
            &Vector3::new(1.0, 0.0, 0.0),
            OrientationStrategy::ShortestArc,
        )
        .unwrap();
        r.update(bone, &DrawTransform::from(&t));
        r.present().unwrap();
        assert_eq!(r.pixel(320, 240), Some(JOINT_COLOR));
    }
}
