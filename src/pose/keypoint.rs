/// MoveNet / COCO の 17 キーポイントインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// 検出器が返す単一キーポイント（ソースフレームのピクセル座標）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// 関節インデックス
    pub index: usize,
    pub x: f32,
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub score: f32,
}

impl Keypoint {
    pub fn new(index: usize, x: f32, y: f32, score: f32) -> Self {
        Self { index, x, y, score }
    }
}

/// 1 回の推論結果
///
/// 検出器は関節を欠落させたり順不同で返すことがあるので、
/// 参照はインデックス検索で行う。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionFrame {
    pub width: u32,
    pub height: u32,
    pub keypoints: Vec<Keypoint>,
}

impl DetectionFrame {
    pub fn new(width: u32, height: u32, keypoints: Vec<Keypoint>) -> Self {
        Self {
            width,
            height,
            keypoints,
        }
    }

    /// 被写体なし
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// インデックスでキーポイントを取得。欠落していれば None。
    pub fn get(&self, index: usize) -> Option<&Keypoint> {
        // 通常は keypoints[i].index == i なので先に直接参照する
        match self.keypoints.get(index) {
            Some(kp) if kp.index == index => Some(kp),
            _ => self.keypoints.iter().find(|kp| kp.index == index),
        }
    }

    /// 全キーポイントの平均スコア
    pub fn average_score(&self) -> f32 {
        if self.keypoints.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.keypoints.iter().map(|k| k.score).sum();
        sum / self.keypoints.len() as f32
    }
}
