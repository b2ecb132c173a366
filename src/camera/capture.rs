use anyhow::{Context, Result};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs},
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::config::CameraConfig;
use crate::error::CaptureError;
use crate::pose::CaptureSource;

/// これだけ連続で読み込みに失敗したらデバイス喪失とみなす
const MAX_CONSECUTIVE_FAILURES: u32 = 60;

/// OpenCVを使用したカメラキャプチャ
pub struct OpenCvCamera {
    capture: VideoCapture,
    width: u32,
    height: u32,
}

impl OpenCvCamera {
    /// 解像度を指定してカメラを開く
    pub fn open(index: i32, width: Option<u32>, height: Option<u32>) -> Result<Self> {
        let mut capture = VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32)
            .context("Failed to open camera")?;

        if !capture.is_opened()? {
            anyhow::bail!("Camera {} is not available", index);
        }

        if let Some(w) = width {
            capture.set(videoio::CAP_PROP_FRAME_WIDTH, w as f64)?;
        }
        if let Some(h) = height {
            capture.set(videoio::CAP_PROP_FRAME_HEIGHT, h as f64)?;
        }
        // 古いフレームを溜めない
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;

        let actual_width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let actual_height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        tracing::info!(
            "camera {}: {}x{} @ {} fps",
            index,
            actual_width,
            actual_height,
            capture.get(videoio::CAP_PROP_FPS)?
        );

        Ok(Self {
            capture,
            width: actual_width,
            height: actual_height,
        })
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// フレームを読み込む（BGR形式）
    pub fn read_frame(&mut self) -> Result<Mat> {
        let mut frame = Mat::default();
        self.capture
            .read(&mut frame)
            .context("Failed to read frame")?;

        if frame.empty() {
            anyhow::bail!("Empty frame received");
        }

        Ok(frame)
    }
}

struct Shared {
    latest: Mutex<Option<Mat>>,
    frame_id: AtomicU64,
    running: AtomicBool,
    lost: Mutex<Option<String>>,
}

/// 別スレッドでカメラキャプチャを行い、最新フレームを提供する
///
/// Drop でキャプチャスレッドを止め、デバイスを解放する。
pub struct ThreadedCamera {
    shared: Arc<Shared>,
    width: u32,
    height: u32,
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadedCamera {
    pub fn start(index: i32, width: Option<u32>, height: Option<u32>) -> Result<Self> {
        let mut camera = OpenCvCamera::open(index, width, height)?;
        let (w, h) = camera.resolution();
        let shared = Arc::new(Shared {
            latest: Mutex::new(None),
            frame_id: AtomicU64::new(0),
            running: AtomicBool::new(true),
            lost: Mutex::new(None),
        });
        let shared_ref = shared.clone();

        let handle = thread::Builder::new()
            .name(format!("camera-{index}"))
            .spawn(move || {
                let mut failures = 0u32;
                while shared_ref.running.load(Ordering::Acquire) {
                    match camera.read_frame() {
                        Ok(frame) => {
                            failures = 0;
                            *shared_ref
                                .latest
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner) = Some(frame);
                            shared_ref.frame_id.fetch_add(1, Ordering::Release);
                        }
                        Err(e) => {
                            failures += 1;
                            if failures >= MAX_CONSECUTIVE_FAILURES {
                                tracing::error!("camera {index}: giving up after {failures} failed reads: {e:#}");
                                *shared_ref
                                    .lost
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner) =
                                    Some(format!("camera {index}: {e:#}"));
                                break;
                            }
                            thread::sleep(Duration::from_millis(5));
                        }
                    }
                }
                // camera はここで drop され、デバイスが解放される
            })
            .context("Failed to spawn capture thread")?;

        Ok(Self {
            shared,
            width: w,
            height: h,
            handle: Some(handle),
        })
    }

    pub fn from_config(config: &CameraConfig) -> Result<Self> {
        Self::start(config.index, Some(config.width), Some(config.height))
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 新フレームが到着するたびにインクリメントされる
    pub fn frame_id(&self) -> u64 {
        self.shared.frame_id.load(Ordering::Acquire)
    }

    /// 最新フレームを取得。初回フレーム到着前のみNone。
    pub fn get_frame(&self) -> Option<Mat> {
        self.shared
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|m| m.clone())
    }

    /// 描画側と共有するための最新フレームハンドル
    pub fn frame_feed(&self) -> FrameFeed {
        FrameFeed {
            shared: self.shared.clone(),
        }
    }
}

/// キャプチャスレッドの最新フレームへの読み取り専用ハンドル
///
/// デバイスの所有権は持たない。カメラ本体が drop されると以後フレームは更新されない。
#[derive(Clone)]
pub struct FrameFeed {
    shared: Arc<Shared>,
}

impl FrameFeed {
    pub fn frame_id(&self) -> u64 {
        self.shared.frame_id.load(Ordering::Acquire)
    }

    pub fn get_frame(&self) -> Option<Mat> {
        self.shared
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|m| m.clone())
    }
}

impl CaptureSource for ThreadedCamera {
    type Frame = Mat;

    fn dimensions(&self) -> (u32, u32) {
        self.resolution()
    }

    fn latest_frame(&mut self) -> Result<Option<Mat>, CaptureError> {
        if let Some(reason) = self
            .shared
            .lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(CaptureError::device_lost(reason));
        }
        Ok(self.get_frame())
    }
}

impl Drop for ThreadedCamera {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
