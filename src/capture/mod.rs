// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频采集系统 (Capture Manager)
///
/// - CameraBackend: 设备后端 (nokhwa: V4L2 / AVFoundation / MediaFoundation)
/// - CaptureSession: 一路活动视频流 + 采集线程
/// - CaptureManager: 会话生命周期 (同一时刻最多一路)
pub mod device;
pub mod manager;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StudioError};

pub use device::{CameraBackend, CameraDevice, NokhwaBackend, VideoStream};
pub use manager::CaptureManager;
pub use session::{CaptureSession, StreamMetadata};

/// 摄像头朝向
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// 前置 (user)
    #[default]
    Front,
    /// 后置 (environment)
    Back,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::Front => FacingMode::Back,
            FacingMode::Back => FacingMode::Front,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FacingMode::Front => "front",
            FacingMode::Back => "back",
        }
    }
}

/// 分辨率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 采集约束 (理想值, 实际协商结果从流元数据读回)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub ideal_frame_rate: u32,
    pub max_frame_rate: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 640,
            ideal_height: 480,
            ideal_frame_rate: 30,
            max_frame_rate: 60,
        }
    }
}

impl CaptureConstraints {
    const MAX_DIMENSION: u32 = 7680;
    const MAX_FPS: u32 = 240;

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("width", self.ideal_width), ("height", self.ideal_height)] {
            if value == 0 || value > Self::MAX_DIMENSION {
                return Err(StudioError::Config(format!(
                    "ideal {} must be between 1 and {}, got {}",
                    name,
                    Self::MAX_DIMENSION,
                    value
                )));
            }
        }
        if self.ideal_frame_rate == 0 || self.max_frame_rate > Self::MAX_FPS {
            return Err(StudioError::Config(format!(
                "frame rate must be within 1..={}, got ideal {} max {}",
                Self::MAX_FPS,
                self.ideal_frame_rate,
                self.max_frame_rate
            )));
        }
        if self.ideal_frame_rate > self.max_frame_rate {
            return Err(StudioError::Config(format!(
                "ideal frame rate {} exceeds max {}",
                self.ideal_frame_rate, self.max_frame_rate
            )));
        }
        Ok(())
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.ideal_width, self.ideal_height)
    }
}

/// 已采集的一帧
///
/// `presentation_time` 为自流开始以来的时间, 同一帧重复读取时保持不变。
#[derive(Debug, Clone)]
pub struct VideoFrame {
    image: Arc<RgbImage>,
    presentation_time: Duration,
    sequence: u64,
}

impl VideoFrame {
    pub fn new(image: RgbImage, presentation_time: Duration, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            presentation_time,
            sequence,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn presentation_time(&self) -> Duration {
        self.presentation_time
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }
}

/// 调度器读取当前帧的来源
pub trait FrameSource {
    fn current_frame(&self) -> Option<&VideoFrame>;
}
