use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::pipeline::DetectionMode;
use crate::render::viewport::MIN_CAMERA_DISTANCE;
use crate::rig::{OrientationStrategy, SkeletonTopology};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// 検出器座標 → レンダー空間の変換
#[derive(Debug, Clone, Deserialize)]
pub struct MappingConfig {
    /// これ以下のスコアの関節は欠損扱い
    #[serde(default = "default_confidence_threshold", alias = "confidenceThreshold")]
    pub confidence_threshold: f32,
    /// レンダー空間での幅・高さ（ユニット）
    #[serde(default = "default_render_span", alias = "renderSpan")]
    pub render_span: f32,
    /// 左右反転（鏡像表示）
    #[serde(default)]
    pub mirror: bool,
    /// 反転後に X に加えるオフセット
    #[serde(default, alias = "lateralOffset")]
    pub lateral_offset: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmoothingConfig {
    /// lerp のブレンド係数 α (0, 1]
    #[serde(default = "default_smoothing_factor", alias = "smoothingFactor")]
    pub factor: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_detection_interval_ms", alias = "detectionIntervalMs")]
    pub interval_ms: u64,
    #[serde(default)]
    pub mode: DetectionMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    #[serde(default = "default_joint_radius")]
    pub joint_radius: f32,
    #[serde(default = "default_bone_radius")]
    pub bone_radius: f32,
    #[serde(default)]
    pub orientation: OrientationStrategy,
    #[serde(default = "default_view_width")]
    pub width: usize,
    #[serde(default = "default_view_height")]
    pub height: usize,
    /// 垂直画角（度）
    #[serde(default = "default_fov_y_deg")]
    pub fov_y_deg: f32,
    /// カメラの Z 位置
    #[serde(default = "default_camera_distance")]
    pub camera_distance: f32,
    #[serde(default = "default_show_grid")]
    pub show_grid: bool,
    #[serde(default = "default_grid_size")]
    pub grid_size: f32,
    #[serde(default = "default_grid_divisions")]
    pub grid_divisions: u32,
}

/// 骨格トポロジー: プリセット名、または joint_count + bones の独自定義
#[derive(Debug, Clone, Deserialize)]
pub struct TopologyConfig {
    #[serde(default = "default_topology_preset")]
    pub preset: String,
    #[serde(default)]
    pub joint_count: Option<usize>,
    #[serde(default)]
    pub bones: Option<Vec<[usize; 2]>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: i32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
    /// 平均スコアがこれ未満なら被写体なし
    #[serde(default = "default_min_pose_score")]
    pub min_pose_score: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// EnvFilter 形式。RUST_LOG が優先される
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_confidence_threshold() -> f32 { 0.5 }
fn default_render_span() -> f32 { 4.0 }
fn default_smoothing_factor() -> f32 { 0.3 }
fn default_detection_interval_ms() -> u64 { 33 }
fn default_target_fps() -> u32 { 60 }
fn default_joint_radius() -> f32 { 0.05 }
fn default_bone_radius() -> f32 { 0.02 }
fn default_view_width() -> usize { 640 }
fn default_view_height() -> usize { 480 }
fn default_fov_y_deg() -> f32 { 75.0 }
fn default_camera_distance() -> f32 { 5.0 }
fn default_show_grid() -> bool { true }
fn default_grid_size() -> f32 { 10.0 }
fn default_grid_divisions() -> u32 { 20 }
fn default_topology_preset() -> String { "coco17".to_string() }
fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_model_path() -> PathBuf { PathBuf::from("models/movenet_lightning.onnx") }
fn default_min_pose_score() -> f32 { 0.2 }
fn default_log_dir() -> PathBuf { PathBuf::from("logs") }
fn default_log_filter() -> String { "info".to_string() }

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            render_span: default_render_span(),
            mirror: false,
            lateral_offset: 0.0,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            factor: default_smoothing_factor(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_detection_interval_ms(),
            mode: DetectionMode::default(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            joint_radius: default_joint_radius(),
            bone_radius: default_bone_radius(),
            orientation: OrientationStrategy::default(),
            width: default_view_width(),
            height: default_view_height(),
            fov_y_deg: default_fov_y_deg(),
            camera_distance: default_camera_distance(),
            show_grid: default_show_grid(),
            grid_size: default_grid_size(),
            grid_divisions: default_grid_divisions(),
        }
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            preset: default_topology_preset(),
            joint_count: None,
            bones: None,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            min_pose_score: default_min_pose_score(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            filter: default_log_filter(),
        }
    }
}

impl TopologyConfig {
    /// 設定からトポロジーを構築（インデックス検証込み）
    pub fn build(&self) -> Result<SkeletonTopology, ConfigError> {
        match (&self.bones, self.joint_count) {
            (Some(bones), Some(joint_count)) => {
                let bones = bones.iter().map(|&[a, b]| (a, b));
                Ok(SkeletonTopology::new(joint_count, bones)?)
            }
            (Some(_), None) => Err(ConfigError::invalid(
                "topology.joint_count",
                "required when topology.bones is given",
            )),
            (None, _) => Ok(SkeletonTopology::preset(&self.preset)?),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// 読み込めなければデフォルト設定
    ///
    /// 読み込みエラーも返す。ログ設定もこのファイルにあるので、
    /// 警告は subscriber を立ち上げた後に呼び出し側が出す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load(path.as_ref()) {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.mapping;
        if !(0.0..=1.0).contains(&m.confidence_threshold) {
            return Err(ConfigError::invalid(
                "mapping.confidence_threshold",
                format!("{} is outside [0, 1]", m.confidence_threshold),
            ));
        }
        if !(m.render_span.is_finite() && m.render_span > 0.0) {
            return Err(ConfigError::invalid(
                "mapping.render_span",
                format!("{} must be positive", m.render_span),
            ));
        }
        if !m.lateral_offset.is_finite() {
            return Err(ConfigError::invalid("mapping.lateral_offset", "must be finite"));
        }
        let alpha = self.smoothing.factor;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::invalid(
                "smoothing.factor",
                format!("{} is outside (0, 1]", alpha),
            ));
        }
        if self.detection.interval_ms == 0 {
            return Err(ConfigError::invalid("detection.interval_ms", "must be at least 1"));
        }
        if self.render.target_fps == 0 {
            return Err(ConfigError::invalid("render.target_fps", "must be at least 1"));
        }
        if self.render.width == 0 || self.render.height == 0 {
            return Err(ConfigError::invalid("render.width/height", "must be non-zero"));
        }
        if !(self.render.fov_y_deg > 0.0 && self.render.fov_y_deg < 180.0) {
            return Err(ConfigError::invalid(
                "render.fov_y_deg",
                format!("{} is outside (0, 180)", self.render.fov_y_deg),
            ));
        }
        let r = &self.render;
        for (field, value) in [
            ("render.joint_radius", r.joint_radius),
            ("render.bone_radius", r.bone_radius),
            ("render.grid_size", r.grid_size),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::invalid(field, format!("{} must be positive", value)));
            }
        }
        // near 面より手前に置くと原点付近が全て切り取られる
        if !(r.camera_distance.is_finite() && r.camera_distance >= MIN_CAMERA_DISTANCE) {
            return Err(ConfigError::invalid(
                "render.camera_distance",
                format!("{} is below {}", r.camera_distance, MIN_CAMERA_DISTANCE),
            ));
        }
        self.topology.build()?;
        Ok(())
    }
}
