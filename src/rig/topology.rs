use std::sync::Arc;

use crate::error::TopologyError;
use crate::pose::KeypointIndex;

/// 骨 (開始関節, 終了関節)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bone {
    pub start: usize,
    pub end: usize,
}

impl Bone {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

const fn link(a: KeypointIndex, b: KeypointIndex) -> Bone {
    Bone::new(a as usize, b as usize)
}

/// 体幹と四肢の接続 (COCO 17 点)
pub const COCO17_BODY: [Bone; 12] = {
    use KeypointIndex::*;
    [
        // 左腕
        link(LeftShoulder, LeftElbow),
        link(LeftElbow, LeftWrist),
        // 右腕
        link(RightShoulder, RightElbow),
        link(RightElbow, RightWrist),
        // 肩
        link(LeftShoulder, RightShoulder),
        // 左脚
        link(LeftHip, LeftKnee),
        link(LeftKnee, LeftAnkle),
        // 右脚
        link(RightHip, RightKnee),
        link(RightKnee, RightAnkle),
        // 腰
        link(LeftHip, RightHip),
        // 胴体
        link(LeftShoulder, LeftHip),
        link(RightShoulder, RightHip),
    ]
};

/// 顔の接続
pub const COCO17_FACE: [Bone; 4] = {
    use KeypointIndex::*;
    [
        link(LeftEar, LeftEye),
        link(LeftEye, Nose),
        link(Nose, RightEye),
        link(RightEye, RightEar),
    ]
};

/// Immutable, validated bone table.
///
/// Every bone index is `< joint_count`. Cloning shares the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkeletonTopology {
    joint_count: usize,
    bones: Arc<[Bone]>,
}

impl SkeletonTopology {
    pub fn new(
        joint_count: usize,
        bones: impl IntoIterator<Item = (usize, usize)>,
    ) -> Result<Self, TopologyError> {
        if joint_count == 0 {
            return Err(TopologyError::NoJoints);
        }
        let bones: Vec<Bone> = bones.into_iter().map(|(a, b)| Bone::new(a, b)).collect();
        for (i, bone) in bones.iter().enumerate() {
            for joint in [bone.start, bone.end] {
                if joint >= joint_count {
                    return Err(TopologyError::JointOutOfRange {
                        bone: i,
                        joint,
                        joint_count,
                    });
                }
            }
            if bone.start == bone.end {
                return Err(TopologyError::SelfLoop {
                    bone: i,
                    joint: bone.start,
                });
            }
        }
        Ok(Self {
            joint_count,
            bones: bones.into(),
        })
    }

    fn from_static(joint_count: usize, bones: impl IntoIterator<Item = Bone>) -> Self {
        Self {
            joint_count,
            bones: bones.into_iter().collect(),
        }
    }

    /// 17 点ボディモデル、12 本の骨
    pub fn coco17() -> Self {
        Self::from_static(KeypointIndex::COUNT, COCO17_BODY)
    }

    /// 17 点ボディモデル + 顔の 4 本
    pub fn coco17_with_face() -> Self {
        Self::from_static(
            KeypointIndex::COUNT,
            COCO17_FACE.into_iter().chain(COCO17_BODY),
        )
    }

    pub fn preset(name: &str) -> Result<Self, TopologyError> {
        match name {
            "coco17" => Ok(Self::coco17()),
            "coco17_face" => Ok(Self::coco17_with_face()),
            other => Err(TopologyError::UnknownPreset(other.to_string())),
        }
    }

    pub fn joint_count(&self) -> usize {
        self.joint_count
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bone(&self, index: usize) -> Option<Bone> {
        self.bones.get(index).copied()
    }
}

impl Default for SkeletonTopology {
    fn default() -> Self {
        Self::coco17()
    }
}
