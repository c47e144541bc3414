// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 关节角度计算 (Angle Engine)
//!
//! 纯函数,无状态,无 I/O。只使用平面坐标 (x, y),忽略深度。

use crate::pose::{Landmark, PoseLandmarkId, Skeleton};

/// 计算 B 点处 B→A 与 B→C 两条射线的夹角 (度)
///
/// 任一向量长度为 0 (或输入非有限值) 时返回 `None`,
/// 余弦值在反余弦前先截断到 [-1, 1],防止浮点误差导致 NaN。
pub fn calculate_angle(a: &Landmark, b: &Landmark, c: &Landmark) -> Option<f32> {
    let (v1x, v1y) = (a.x as f64 - b.x as f64, a.y as f64 - b.y as f64);
    let (v2x, v2y) = (c.x as f64 - b.x as f64, c.y as f64 - b.y as f64);

    let magnitude1 = (v1x * v1x + v1y * v1y).sqrt();
    let magnitude2 = (v2x * v2x + v2y * v2y).sqrt();
    let denominator = magnitude1 * magnitude2;
    if denominator == 0.0 || !denominator.is_finite() {
        return None;
    }

    let dot = v1x * v2x + v1y * v2y;
    let cos_angle = (dot / denominator).clamp(-1.0, 1.0);
    if cos_angle.is_nan() {
        return None;
    }

    Some(cos_angle.acos().to_degrees() as f32)
}

/// 关节名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointKey {
    LeftElbow,
    RightElbow,
    LeftShoulder,
    RightShoulder,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
}

impl JointKey {
    pub const ALL: [JointKey; 8] = [
        JointKey::LeftElbow,
        JointKey::RightElbow,
        JointKey::LeftShoulder,
        JointKey::RightShoulder,
        JointKey::LeftHip,
        JointKey::RightHip,
        JointKey::LeftKnee,
        JointKey::RightKnee,
    ];

    pub fn label(self) -> &'static str {
        match self {
            JointKey::LeftElbow => "leftElbow",
            JointKey::RightElbow => "rightElbow",
            JointKey::LeftShoulder => "leftShoulder",
            JointKey::RightShoulder => "rightShoulder",
            JointKey::LeftHip => "leftHip",
            JointKey::RightHip => "rightHip",
            JointKey::LeftKnee => "leftKnee",
            JointKey::RightKnee => "rightKnee",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// 一个关节由三个关键点定义, vertex 为角的顶点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JointDefinition {
    pub key: JointKey,
    pub first: PoseLandmarkId,
    pub vertex: PoseLandmarkId,
    pub last: PoseLandmarkId,
}

const fn joint(
    key: JointKey,
    first: PoseLandmarkId,
    vertex: PoseLandmarkId,
    last: PoseLandmarkId,
) -> JointDefinition {
    JointDefinition {
        key,
        first,
        vertex,
        last,
    }
}

/// 静态关节表
pub const JOINT_TABLE: [JointDefinition; 8] = {
    use PoseLandmarkId::*;
    [
        joint(JointKey::LeftElbow, LeftShoulder, LeftElbow, LeftWrist),
        joint(JointKey::RightElbow, RightShoulder, RightElbow, RightWrist),
        joint(JointKey::LeftShoulder, LeftElbow, LeftShoulder, LeftHip),
        joint(JointKey::RightShoulder, RightElbow, RightShoulder, RightHip),
        joint(JointKey::LeftHip, LeftShoulder, LeftHip, LeftKnee),
        joint(JointKey::RightHip, RightShoulder, RightHip, RightKnee),
        joint(JointKey::LeftKnee, LeftHip, LeftKnee, LeftAnkle),
        joint(JointKey::RightKnee, RightHip, RightKnee, RightAnkle),
    ]
};

/// 每帧一份的关节角度, None 表示无法确定
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JointAngleSet {
    angles: [Option<f32>; 8],
}

impl JointAngleSet {
    pub fn undetermined() -> Self {
        Self::default()
    }

    /// 按关节表计算; 可见度低于 `min_visibility` 的点视为缺失
    pub fn from_skeleton(skeleton: &Skeleton, min_visibility: f32) -> Self {
        let mut set = Self::undetermined();
        let point = |id: PoseLandmarkId| {
            skeleton
                .get(id)
                .filter(|lm| lm.is_visible(min_visibility))
        };

        for def in JOINT_TABLE.iter() {
            set.angles[def.key.slot()] = match (point(def.first), point(def.vertex), point(def.last)) {
                (Some(a), Some(b), Some(c)) => calculate_angle(a, b, c),
                _ => None,
            };
        }
        set
    }

    /// 只取第一个骨架 (主目标)
    pub fn from_primary(skeletons: &[Skeleton], min_visibility: f32) -> Self {
        skeletons
            .first()
            .map(|s| Self::from_skeleton(s, min_visibility))
            .unwrap_or_default()
    }

    pub fn get(&self, key: JointKey) -> Option<f32> {
        self.angles[key.slot()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (JointKey, Option<f32>)> + '_ {
        JointKey::ALL.iter().map(move |k| (*k, self.get(*k)))
    }

    pub fn determined_count(&self) -> usize {
        self.angles.iter().filter(|a| a.is_some()).count()
    }

    pub fn reset(&mut self) {
        *self = Self::undetermined();
    }
}
