// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 姿态数据模型 (Pose data model)
//!
//! 33 点 BlazePose 关键点枚举、单人骨架以及连线拓扑。
//! 坐标均为相对帧尺寸的归一化值 [0,1]。

/// 骨架关键点数量
pub const LANDMARK_COUNT: usize = 33;

/// 单个关键点
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: Option<f32>,
    pub visibility: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            ..Default::default()
        }
    }

    pub fn with_depth(mut self, z: f32) -> Self {
        self.z = Some(z);
        self
    }

    pub fn with_visibility(mut self, visibility: f32) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// 没有置信度信息时视为可见
    pub fn is_visible(&self, min_visibility: f32) -> bool {
        self.visibility.map_or(true, |v| v >= min_visibility)
    }

    /// 映射到像素坐标
    pub fn to_pixel(&self, width: u32, height: u32) -> (f32, f32) {
        (self.x * width as f32, self.y * height as f32)
    }
}

/// 关键点编号 (与推理服务输出顺序一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoseLandmarkId {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl PoseLandmarkId {
    pub const ALL: [PoseLandmarkId; LANDMARK_COUNT] = [
        PoseLandmarkId::Nose,
        PoseLandmarkId::LeftEyeInner,
        PoseLandmarkId::LeftEye,
        PoseLandmarkId::LeftEyeOuter,
        PoseLandmarkId::RightEyeInner,
        PoseLandmarkId::RightEye,
        PoseLandmarkId::RightEyeOuter,
        PoseLandmarkId::LeftEar,
        PoseLandmarkId::RightEar,
        PoseLandmarkId::MouthLeft,
        PoseLandmarkId::MouthRight,
        PoseLandmarkId::LeftShoulder,
        PoseLandmarkId::RightShoulder,
        PoseLandmarkId::LeftElbow,
        PoseLandmarkId::RightElbow,
        PoseLandmarkId::LeftWrist,
        PoseLandmarkId::RightWrist,
        PoseLandmarkId::LeftPinky,
        PoseLandmarkId::RightPinky,
        PoseLandmarkId::LeftIndex,
        PoseLandmarkId::RightIndex,
        PoseLandmarkId::LeftThumb,
        PoseLandmarkId::RightThumb,
        PoseLandmarkId::LeftHip,
        PoseLandmarkId::RightHip,
        PoseLandmarkId::LeftKnee,
        PoseLandmarkId::RightKnee,
        PoseLandmarkId::LeftAnkle,
        PoseLandmarkId::RightAnkle,
        PoseLandmarkId::LeftHeel,
        PoseLandmarkId::RightHeel,
        PoseLandmarkId::LeftFootIndex,
        PoseLandmarkId::RightFootIndex,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// 单人骨架: 固定 33 个槽位, 缺失的关键点为 None
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    slots: [Option<Landmark>; LANDMARK_COUNT],
}

impl Default for Skeleton {
    fn default() -> Self {
        Self::empty()
    }
}

impl Skeleton {
    pub fn empty() -> Self {
        Self {
            slots: [None; LANDMARK_COUNT],
        }
    }

    /// 按编号顺序填充, 多余的点被忽略
    pub fn from_landmarks<I>(landmarks: I) -> Self
    where
        I: IntoIterator<Item = Landmark>,
    {
        let mut slots = [None; LANDMARK_COUNT];
        for (slot, landmark) in slots.iter_mut().zip(landmarks) {
            *slot = Some(landmark);
        }
        Self { slots }
    }

    pub fn from_slots(slots: [Option<Landmark>; LANDMARK_COUNT]) -> Self {
        Self { slots }
    }

    pub fn with(mut self, id: PoseLandmarkId, landmark: Landmark) -> Self {
        self.slots[id.index()] = Some(landmark);
        self
    }

    pub fn without(mut self, id: PoseLandmarkId) -> Self {
        self.slots[id.index()] = None;
        self
    }

    pub fn get(&self, id: PoseLandmarkId) -> Option<&Landmark> {
        self.slots[id.index()].as_ref()
    }

    pub fn slots(&self) -> &[Option<Landmark>; LANDMARK_COUNT] {
        &self.slots
    }

    /// 已检出的关键点 (编号, 点)
    pub fn landmarks(&self) -> impl Iterator<Item = (PoseLandmarkId, &Landmark)> + '_ {
        PoseLandmarkId::ALL
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(id, slot)| slot.as_ref().map(|lm| (*id, lm)))
    }

    pub fn detected_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// 骨架连线拓扑 (BlazePose POSE_CONNECTIONS)
pub const POSE_CONNECTIONS: [(usize, usize); 35] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    (11, 23),
    (12, 24),
    (23, 24),
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

/// COCO 17 点 → BlazePose 槽位
pub const COCO_TO_POSE: [PoseLandmarkId; 17] = [
    PoseLandmarkId::Nose,
    PoseLandmarkId::LeftEye,
    PoseLandmarkId::RightEye,
    PoseLandmarkId::LeftEar,
    PoseLandmarkId::RightEar,
    PoseLandmarkId::LeftShoulder,
    PoseLandmarkId::RightShoulder,
    PoseLandmarkId::LeftElbow,
    PoseLandmarkId::RightElbow,
    PoseLandmarkId::LeftWrist,
    PoseLandmarkId::RightWrist,
    PoseLandmarkId::LeftHip,
    PoseLandmarkId::RightHip,
    PoseLandmarkId::LeftKnee,
    PoseLandmarkId::RightKnee,
    PoseLandmarkId::LeftAnkle,
    PoseLandmarkId::RightAnkle,
];
