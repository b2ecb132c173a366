use anyhow::{Context, Result};
use opencv::core::Mat;
use opencv::prelude::*;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use super::keypoint::{Keypoint, KeypointIndex};
use super::preprocess::preprocess_for_movenet;
use super::source::KeypointSource;
use crate::config::ModelConfig;
use crate::error::DetectionError;

const INPUT_NAME: &str = "serving_default_input_0";
const OUTPUT_NAME: &str = "StatefulPartitionedCall_0";

fn build_session(model_path: &Path) -> Result<Session> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "cuda")]
    let builder = {
        tracing::info!("ort: requesting CUDA execution provider");
        builder.with_execution_providers([
            ort::execution_providers::CUDAExecutionProvider::default().build(),
        ])?
    };

    builder
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model {}", model_path.display()))
}

/// MoveNet SinglePose を使用したキーポイント検出器
pub struct MoveNetDetector {
    session: Session,
    /// 平均スコアがこれ未満なら「被写体なし」
    min_pose_score: f32,
}

impl MoveNetDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, min_pose_score: f32) -> Result<Self> {
        let session = build_session(model_path.as_ref())?;
        Ok(Self {
            session,
            min_pose_score,
        })
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        Self::new(&config.path, config.min_pose_score)
    }

    fn run(&mut self, frame: &Mat) -> Result<Vec<Keypoint>, DetectionError> {
        let width = frame.cols() as f32;
        let height = frame.rows() as f32;

        let input = preprocess_for_movenet(frame).map_err(|e| DetectionError::inference(e.to_string()))?;
        let input_tensor =
            Tensor::from_array(input).map_err(|e| DetectionError::inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![INPUT_NAME => input_tensor])
            .map_err(|e| DetectionError::inference(e.to_string()))?;

        // 出力は [1, 1, 17, 3] (y, x, score)、正規化座標
        let output: ndarray::ArrayViewD<f32> = outputs[OUTPUT_NAME]
            .try_extract_array()
            .map_err(|e| DetectionError::invalid_output(e.to_string()))?;
        if output.shape() != [1, 1, KeypointIndex::COUNT, 3] {
            return Err(DetectionError::invalid_output(format!(
                "expected [1, 1, 17, 3], got {:?}",
                output.shape()
            )));
        }

        Ok((0..KeypointIndex::COUNT)
            .map(|i| {
                Keypoint::new(
                    i,
                    output[[0, 0, i, 1]] * width,
                    output[[0, 0, i, 0]] * height,
                    output[[0, 0, i, 2]],
                )
            })
            .collect())
    }
}

impl KeypointSource<Mat> for MoveNetDetector {
    fn estimate(&mut self, frame: &Mat) -> Result<Vec<Keypoint>, DetectionError> {
        if frame.empty() {
            return Err(DetectionError::unavailable("empty frame"));
        }
        let keypoints = self.run(frame)?;

        // SinglePose は常に 17 点を返すので、平均スコアで被写体の有無を判定する
        let mean = keypoints.iter().map(|k| k.score).sum::<f32>() / keypoints.len() as f32;
        if mean < self.min_pose_score {
            return Ok(Vec::new());
        }
        Ok(keypoints)
    }
}
