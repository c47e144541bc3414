// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 姿态推理服务 (Inference Service)
///
/// # 架构说明
///
/// ## 推理后端 (ort_backend.rs)
/// - ONNX Runtime 会话构建、执行器选择 (CPU / CUDA / TensorRT)
///
/// ## 模型解码
/// - **BlazePose**: 33 点 + 可见度 + 存在度, 带 ROI 跟踪 (`blazepose.rs`)
/// - **YOLOv8-pose**: 17 点 COCO, 映射到 33 点槽位 (`yolo_pose.rs`)
///
/// ## PoseLandmarker Trait
/// 统一的推理接口: 帧 + 单调时间戳 → 骨架列表
///
/// ```text
/// RgbImage + timestamp(us) → infer → Vec<Skeleton>
/// ```
pub mod blazepose;
pub mod landmarker;
pub mod ort_backend;
pub mod preprocess;
pub mod yolo_pose;

use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StudioError};
use crate::pose::Skeleton;

pub use landmarker::{ModelKind, OrtPoseLandmarker};
pub use ort_backend::{OrtBackend, OrtConfig, OrtEP};

/// 运行模式: 视频模式下要求时间戳严格递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunningMode {
    Image,
    #[default]
    Video,
}

/// 执行器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
    #[default]
    Cpu,
    Cuda,
    TensorRt,
}

/// 推理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceOptions {
    pub running_mode: RunningMode,
    /// 最多检测人数
    pub num_poses: usize,
    pub min_detection_confidence: f32,
    pub min_presence_confidence: f32,
    pub min_tracking_confidence: f32,
    /// 分割掩码 (不支持, 必须为 false)
    pub output_segmentation_masks: bool,
    pub delegate: Delegate,
    pub device_id: i32,
    /// NMS IoU 阈值 (YOLO 模型)
    pub iou_threshold: f32,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            running_mode: RunningMode::Video,
            num_poses: 2,
            min_detection_confidence: 0.5,
            min_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
            output_segmentation_masks: false,
            delegate: Delegate::Cpu,
            device_id: 0,
            iou_threshold: 0.45,
        }
    }
}

impl InferenceOptions {
    pub fn validate(&self) -> Result<()> {
        if self.num_poses == 0 {
            return Err(StudioError::Config("num_poses must be at least 1".into()));
        }
        for (name, value) in [
            ("min_detection_confidence", self.min_detection_confidence),
            ("min_presence_confidence", self.min_presence_confidence),
            ("min_tracking_confidence", self.min_tracking_confidence),
            ("iou_threshold", self.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(StudioError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// 统一的姿态推理接口
pub trait PoseLandmarker {
    /// 单帧推理; 视频模式下 `timestamp_us` 必须严格递增
    ///
    /// 返回的骨架坐标为相对帧尺寸的归一化值, 没有检测到人时返回空列表。
    fn infer(&mut self, frame: &RgbImage, timestamp_us: u64) -> Result<Vec<Skeleton>>;

    fn options(&self) -> &InferenceOptions;

    /// 释放推理资源; 之后的 infer 返回 HandleInvalidated
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}

/// 时间戳守卫: 拒绝不严格递增的时间戳
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampGuard {
    last: Option<u64>,
}

impl TimestampGuard {
    pub fn check(&mut self, timestamp_us: u64) -> Result<()> {
        if let Some(last) = self.last {
            if timestamp_us <= last {
                return Err(StudioError::InferenceOrder {
                    last,
                    got: timestamp_us,
                });
            }
        }
        self.last = Some(timestamp_us);
        Ok(())
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

pub type BoxedLandmarker = Box<dyn PoseLandmarker + Send>;

/// 后台加载模型 (加载可能耗时数秒, 不阻塞渲染循环)
pub struct ModelLoader {
    rx: Receiver<Result<BoxedLandmarker>>,
    worker: Option<JoinHandle<()>>,
}

impl ModelLoader {
    pub fn spawn<F>(factory: F) -> Result<Self>
    where
        F: FnOnce() -> Result<BoxedLandmarker> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let worker = std::thread::Builder::new()
            .name("model-loader".into())
            .spawn(move || {
                let _ = tx.send(factory());
            })?;
        Ok(Self {
            rx,
            worker: Some(worker),
        })
    }

    /// 非阻塞查询: None 表示仍在加载
    pub fn poll(&mut self) -> Option<Result<BoxedLandmarker>> {
        let result = match self.rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(StudioError::ModelInit(
                "model loader thread exited without a result".into(),
            )),
        };
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_default_options() {
        let opts = InferenceOptions::default();
        assert_eq!(opts.num_poses, 2);
        assert_eq!(opts.running_mode, RunningMode::Video);
        assert!(!opts.output_segmentation_masks);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_invalid_options() {
        let opts = InferenceOptions {
            num_poses: 0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = InferenceOptions {
            min_presence_confidence: 1.5,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(StudioError::Config(_))));
    }

    #[test]
    fn test_timestamp_guard() {
        let mut guard = TimestampGuard::default();
        guard.check(100).unwrap();
        guard.check(101).unwrap();
        assert!(matches!(
            guard.check(101),
            Err(StudioError::InferenceOrder { last: 101, got: 101 })
        ));
        assert!(guard.check(50).is_err());
        assert_eq!(guard.last(), Some(101));
        guard.reset();
        guard.check(1).unwrap();
    }

    #[test]
    fn test_loader_reports_failure() {
        let mut loader =
            ModelLoader::spawn(|| Err(StudioError::ModelInit("missing file".into()))).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let result = loop {
            if let Some(result) = loader.poll() {
                break result;
            }
            assert!(Instant::now() < deadline, "loader never finished");
            std::thread::sleep(Duration::from_millis(1));
        };
        assert!(matches!(result, Err(StudioError::ModelInit(_))));
    }
}
