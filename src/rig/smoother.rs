use nalgebra::Vector3;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::SmoothingConfig;

/// 関節ごとの指数平滑化 (EMA)
///
/// `smoothed[i] = lerp(smoothed[i], new, alpha)`。
/// 初期値は原点で、初回の検出も原点から補間される。
/// 欠損した関節は前回値を保持する（原点へは減衰しない）。
#[derive(Debug, Clone)]
pub struct JointSmoother {
    alpha: f32,
    positions: Vec<Vector3<f32>>,
    tracked: Vec<bool>,
    generation: u64,
}

impl JointSmoother {
    pub fn new(joint_count: usize, alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            positions: vec![Vector3::zeros(); joint_count],
            tracked: vec![false; joint_count],
            generation: 0,
        }
    }

    pub fn from_config(joint_count: usize, config: &SmoothingConfig) -> Self {
        Self::new(joint_count, config.factor)
    }

    pub fn joint_count(&self) -> usize {
        self.positions.len()
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// 新しい観測値で関節を更新。範囲外のインデックスは false。
    pub fn update(&mut self, index: usize, target: Vector3<f32>) -> bool {
        let Some(current) = self.positions.get_mut(index) else {
            return false;
        };
        *current = current.lerp(&target, self.alpha);
        self.tracked[index] = true;
        true
    }

    /// 1 回の検出フレームを適用し終えたことを記録する
    pub fn commit_frame(&mut self) {
        self.generation += 1;
    }

    /// 平滑化後の位置。範囲外は None。
    pub fn position(&self, index: usize) -> Option<Vector3<f32>> {
        self.positions.get(index).copied()
    }

    pub fn positions(&self) -> &[Vector3<f32>] {
        &self.positions
    }

    /// 一度でも観測されたか
    pub fn is_tracked(&self, index: usize) -> bool {
        self.tracked.get(index).copied().unwrap_or(false)
    }

    /// 適用済み検出フレーム数
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// レンダーループが読む、ある時点の関節位置のコピー
#[derive(Debug, Clone, PartialEq)]
pub struct JointSnapshot {
    pub positions: Vec<Vector3<f32>>,
    pub tracked: Vec<bool>,
    pub generation: u64,
}

impl JointSnapshot {
    /// 範囲外の関節は原点扱い
    pub fn position(&self, index: usize) -> Vector3<f32> {
        self.positions.get(index).copied().unwrap_or_else(Vector3::zeros)
    }
}

/// 検出スレッド（書き込み）とレンダースレッド（読み込み）で共有する平滑化状態
///
/// 配列全体を 1 つの RwLock で守る。書き込みは検出 1 回につき 1 回だけ。
#[derive(Debug, Clone)]
pub struct SharedJoints {
    inner: Arc<RwLock<JointSmoother>>,
}

impl SharedJoints {
    pub fn new(smoother: JointSmoother) -> Self {
        Self {
            inner: Arc::new(RwLock::new(smoother)),
        }
    }

    /// 書き込みロックを取って smoother を更新する
    pub fn write<R>(&self, f: impl FnOnce(&mut JointSmoother) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn read<R>(&self, f: impl FnOnce(&JointSmoother) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn snapshot(&self) -> JointSnapshot {
        self.read(|s| JointSnapshot {
            positions: s.positions.clone(),
            tracked: s.tracked.clone(),
            generation: s.generation,
        })
    }

    pub fn joint_count(&self) -> usize {
        self.read(JointSmoother::joint_count)
    }

    pub fn generation(&self) -> u64 {
        self.read(JointSmoother::generation)
    }
}
