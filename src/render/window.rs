use anyhow::Result;
use minifb::{Key, Window, WindowOptions};
use opencv::core::{Mat, Vec3b};
use opencv::prelude::*;

use super::backend::{DrawTransform, RenderBackend};
use super::software::{PrimitiveId, SoftwareRenderer};
use crate::camera::FrameFeed;
use crate::config::RenderConfig;
use crate::error::RenderError;

/// minifb ウィンドウに CPU ラスタライズしたリグを表示する
pub struct MinifbRenderer {
    window: Window,
    scene: SoftwareRenderer,
    feed: Option<FrameFeed>,
    last_frame_id: u64,
}

impl MinifbRenderer {
    /// ウィンドウを作成
    pub fn new(title: &str, config: &RenderConfig) -> Result<Self> {
        let scene = SoftwareRenderer::from_config(config);
        let mut window = Window::new(
            title,
            scene.width(),
            scene.height(),
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        )?;
        // ペーシングは呼び出し側のループに任せる
        window.set_target_fps(0);

        Ok(Self {
            window,
            scene,
            feed: None,
            last_frame_id: 0,
        })
    }

    /// カメラ映像を背景に敷く
    pub fn with_background(mut self, feed: FrameFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn scene(&self) -> &SoftwareRenderer {
        &self.scene
    }

    /// 新しいフレームが来ていれば背景を差し替える
    fn refresh_background(&mut self) {
        let Some(feed) = self.feed.as_ref() else {
            return;
        };
        let frame_id = feed.frame_id();
        if frame_id == self.last_frame_id {
            return;
        }
        let Some(frame) = feed.get_frame() else {
            return;
        };
        self.last_frame_id = frame_id;

        match bgr_to_0rgb(&frame) {
            Ok(pixels) => {
                self.scene
                    .set_background(&pixels, frame.cols() as usize, frame.rows() as usize)
            }
            Err(e) => tracing::warn!("background conversion failed: {}", e),
        }
    }
}

/// BGR Mat を minifb の 0RGB バッファに変換
fn bgr_to_0rgb(frame: &Mat) -> opencv::Result<Vec<u32>> {
    let (rows, cols) = (frame.rows(), frame.cols());
    let mut pixels = Vec::with_capacity((rows.max(0) * cols.max(0)) as usize);
    for y in 0..rows {
        for x in 0..cols {
            let pixel = frame.at_2d::<Vec3b>(y, x)?;
            let r = pixel[2] as u32;
            let g = pixel[1] as u32;
            let b = pixel[0] as u32;
            pixels.push((r << 16) | (g << 8) | b);
        }
    }
    Ok(pixels)
}

impl RenderBackend for MinifbRenderer {
    type Handle = PrimitiveId;

    fn create_sphere(&mut self, radius: f32) -> PrimitiveId {
        self.scene.create_sphere(radius)
    }

    fn create_capsule(&mut self, radius: f32) -> PrimitiveId {
        self.scene.create_capsule(radius)
    }

    fn update(&mut self, handle: PrimitiveId, transform: &DrawTransform) {
        self.scene.update(handle, transform);
    }

    fn present(&mut self) -> Result<(), RenderError> {
        self.refresh_background();
        self.scene.present()?;
        self.window
            .update_with_buffer(self.scene.buffer(), self.scene.width(), self.scene.height())
            .map_err(|e| RenderError::backend(e.to_string()))
    }

    /// Escape でも閉じる
    fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }
}
