// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 基于 ONNX Runtime 的姿态推理服务

use std::path::Path;
use std::time::Instant;

use image::RgbImage;

use super::blazepose::BlazePose;
use super::ort_backend::{OrtBackend, OrtConfig, OrtEP};
use super::yolo_pose::YoloPose;
use super::{InferenceOptions, PoseLandmarker, RunningMode, TimestampGuard};
use crate::error::{Result, StudioError};
use crate::pose::Skeleton;

/// 模型类型 (从文件名推断)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// BlazePose 33 点关键点模型
    BlazePose,
    /// YOLOv8-pose 17 点多人模型
    YoloPose,
}

impl ModelKind {
    pub fn from_path(path: &str) -> Self {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.contains("yolo") {
            ModelKind::YoloPose
        } else {
            ModelKind::BlazePose
        }
    }

    /// 动态输入尺寸时的默认 (height, width)
    fn default_image_size(&self) -> (u32, u32) {
        match self {
            ModelKind::BlazePose => (256, 256),
            ModelKind::YoloPose => (640, 640),
        }
    }
}

enum Model {
    BlazePose(BlazePose),
    YoloPose(YoloPose),
}

pub struct OrtPoseLandmarker {
    model: Option<Model>,
    kind: ModelKind,
    options: InferenceOptions,
    guard: TimestampGuard,
    profile: bool,
}

impl OrtPoseLandmarker {
    /// 加载模型并构建推理会话
    pub fn initialize(model_path: &str, options: InferenceOptions) -> Result<Self> {
        options
            .validate()
            .map_err(|e| StudioError::ModelInit(e.to_string()))?;
        if options.output_segmentation_masks {
            return Err(StudioError::ModelInit(
                "segmentation masks are not supported".into(),
            ));
        }
        if !Path::new(model_path).exists() {
            return Err(StudioError::ModelInit(format!(
                "model file not found: {}",
                model_path
            )));
        }

        let kind = ModelKind::from_path(model_path);
        let ep = OrtEP::from_options(&options);
        let t = Instant::now();
        let engine = OrtBackend::build(OrtConfig {
            f: model_path.to_string(),
            ep,
            trt_fp16: true,
            image_size: kind.default_image_size(),
        })
        .map_err(|e| StudioError::ModelInit(format!("{:#}", e)))?;

        tracing::info!(
            "🧠 模型加载完成: {} ({:?}, {:?}, {}x{}, {:?})",
            model_path,
            kind,
            engine.ep(),
            engine.width(),
            engine.height(),
            t.elapsed()
        );

        let model = match kind {
            ModelKind::BlazePose => Model::BlazePose(BlazePose::new(engine)),
            ModelKind::YoloPose => Model::YoloPose(YoloPose::new(engine)),
        };

        Ok(Self {
            model: Some(model),
            kind,
            options,
            guard: TimestampGuard::default(),
            profile: false,
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// 打印每帧推理耗时
    pub fn set_profile(&mut self, profile: bool) {
        self.profile = profile;
    }
}

impl PoseLandmarker for OrtPoseLandmarker {
    fn infer(&mut self, frame: &RgbImage, timestamp_us: u64) -> Result<Vec<Skeleton>> {
        let model = self.model.as_mut().ok_or(StudioError::HandleInvalidated)?;
        if self.options.running_mode == RunningMode::Video {
            self.guard.check(timestamp_us)?;
        }

        let t = Instant::now();
        let result = match model {
            Model::BlazePose(m) => {
                // 图片模式下每帧独立, 不沿用上一帧的 ROI
                if self.options.running_mode == RunningMode::Image {
                    m.reset_tracking();
                }
                m.run(frame, &self.options)
            }
            Model::YoloPose(m) => m.run(frame, &self.options),
        };
        if self.profile {
            tracing::debug!("[{:?} Inference]: {:?}", self.kind, t.elapsed());
        }

        result.map_err(|e| StudioError::InferenceTick(format!("{:#}", e)))
    }

    fn options(&self) -> &InferenceOptions {
        &self.options
    }

    fn dispose(&mut self) {
        if self.model.take().is_some() {
            tracing::info!("🗑️ 推理会话已释放");
        }
    }

    fn is_disposed(&self) -> bool {
        self.model.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_kind_from_path() {
        assert_eq!(
            ModelKind::from_path("models/pose_landmark_full.onnx"),
            ModelKind::BlazePose
        );
        assert_eq!(
            ModelKind::from_path("models/YOLOv8n-pose.onnx"),
            ModelKind::YoloPose
        );
        // 只看文件名
        assert_eq!(
            ModelKind::from_path("yolo_models/pose_landmark_lite.onnx"),
            ModelKind::BlazePose
        );
    }

    #[test]
    fn test_segmentation_masks_rejected() {
        let opts = InferenceOptions {
            output_segmentation_masks: true,
            ..Default::default()
        };
        let result = OrtPoseLandmarker::initialize("models/pose_landmark_full.onnx", opts);
        assert!(matches!(result, Err(StudioError::ModelInit(_))));
    }

    #[test]
    fn test_missing_model_file() {
        let result = OrtPoseLandmarker::initialize(
            "/nonexistent/pose_landmark_full.onnx",
            InferenceOptions::default(),
        );
        assert!(matches!(result, Err(StudioError::ModelInit(_))));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let opts = InferenceOptions {
            num_poses: 0,
            ..Default::default()
        };
        let result = OrtPoseLandmarker::initialize("models/pose_landmark_full.onnx", opts);
        assert!(matches!(result, Err(StudioError::ModelInit(_))));

        let opts = InferenceOptions {
            min_detection_confidence: 1.5,
            ..Default::default()
        };
        let result = OrtPoseLandmarker::initialize("models/pose_landmark_full.onnx", opts);
        match result {
            Err(StudioError::ModelInit(msg)) => assert!(msg.contains("min_detection_confidence")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
