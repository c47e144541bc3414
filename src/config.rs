// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 运行配置 - 命令行参数 + JSON 配置文件

use std::fs;
use std::path::Path;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::capture::{CaptureConstraints, FacingMode};
use crate::error::{Result, StudioError};
use crate::inference::{Delegate, InferenceOptions};

/// 命令行参数
#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "实时姿态工作室 (Motion Studio)", long_about = None)]
pub struct Args {
    /// ONNX 模型路径 (文件名含 yolo 时按 YOLOv8-pose 解码)
    #[arg(long, default_value = "models/pose_landmark_full.onnx")]
    pub model: String,

    /// JSON 配置文件 (不存在时写入默认值)
    #[arg(long, default_value = "studio_config.json")]
    pub config: String,

    /// 摄像头朝向 (覆盖配置文件)
    #[arg(long, value_enum)]
    pub facing: Option<FacingMode>,

    /// 使用 CUDA 执行器
    #[arg(long)]
    pub cuda: bool,

    /// 使用 TensorRT 执行器
    #[arg(long)]
    pub trt: bool,

    /// GPU 设备编号
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// 最多检测人数 (覆盖配置文件)
    #[arg(long)]
    pub num_poses: Option<usize>,

    /// 打印每帧推理耗时
    #[arg(long)]
    pub profile: bool,

    /// 列出可用摄像头后退出
    #[arg(long)]
    pub list: bool,

    /// 日志级别 (trace/debug/info/warn/error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// 采集配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub constraints: CaptureConstraints,
    pub facing: FacingMode,
    /// 指定前置摄像头的设备索引 (None = 自动识别)
    pub front_device: Option<u32>,
    /// 指定后置摄像头的设备索引 (None = 自动识别)
    pub back_device: Option<u32>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            constraints: CaptureConstraints::default(),
            facing: FacingMode::Front,
            front_device: None,
            back_device: None,
        }
    }
}

/// 叠加层样式 (颜色为 #RRGGBB)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub connector_color: String,
    pub connector_width: f32,
    pub marker_stroke_color: String,
    pub marker_fill_color: String,
    pub marker_stroke_width: f32,
    pub marker_radius: f32,
    /// 低于该可见度的关键点不绘制
    pub min_visibility: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            connector_color: "#FFFFFF".into(),
            connector_width: 5.0,
            marker_stroke_color: "#FFFFFF".into(),
            marker_fill_color: "#000000".into(),
            marker_stroke_width: 3.0,
            marker_radius: 10.0,
            min_visibility: 0.0,
        }
    }
}

/// 帧调度配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 绑定视频流后等待第一帧的上限 (毫秒)
    pub playback_timeout_ms: u64,
    /// 计算关节角度时可见度低于该值的点视为缺失
    pub min_visibility: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            playback_timeout_ms: 5000,
            min_visibility: 0.0,
        }
    }
}

/// 完整配置文件
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub capture: CaptureConfig,
    pub inference: InferenceOptions,
    pub overlay: OverlayConfig,
    pub pipeline: PipelineConfig,
}

impl StudioConfig {
    /// 从JSON文件加载配置
    ///
    /// 文件不存在时写入默认配置; 解析失败时使用默认值
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    tracing::info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    tracing::error!("❌ 保存配置失败: {}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StudioError::Config(format!("serialize: {}", e)))?;
        fs::write(path.as_ref(), json)?;
        tracing::info!("💾 配置已保存到 {}", path.as_ref().display());
        Ok(())
    }

    /// 命令行参数覆盖配置文件
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(facing) = args.facing {
            self.capture.facing = facing;
        }
        if let Some(num_poses) = args.num_poses {
            self.inference.num_poses = num_poses;
        }
        if args.trt {
            self.inference.delegate = Delegate::TensorRt;
        } else if args.cuda {
            self.inference.delegate = Delegate::Cuda;
        }
        if args.cuda || args.trt {
            self.inference.device_id = args.device_id;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.capture.constraints.validate()?;
        self.inference.validate()?;
        if self.pipeline.playback_timeout_ms == 0 {
            return Err(StudioError::Config(
                "playback_timeout_ms must be positive".into(),
            ));
        }
        for (name, value) in [
            ("overlay.min_visibility", self.overlay.min_visibility),
            ("pipeline.min_visibility", self.pipeline.min_visibility),
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

    /// 打印当前配置
    pub fn print_summary(&self) {
        tracing::info!("🎛️  当前配置:");
        tracing::info!(
            "  采集: {} {}x{} @ {}fps (max {})",
            self.capture.facing.label(),
            self.capture.constraints.ideal_width,
            self.capture.constraints.ideal_height,
            self.capture.constraints.ideal_frame_rate,
            self.capture.constraints.max_frame_rate
        );
        tracing::info!(
            "  推理: {:?} {:?} 人数 {} 阈值 {:.2}/{:.2}/{:.2}",
            self.inference.running_mode,
            self.inference.delegate,
            self.inference.num_poses,
            self.inference.min_detection_confidence,
            self.inference.min_presence_confidence,
            self.inference.min_tracking_confidence
        );
        tracing::info!("  首帧等待: {}ms", self.pipeline.playback_timeout_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["studio"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studio_config.json");
        let config = StudioConfig::load(&path);
        assert_eq!(config, StudioConfig::default());
        assert!(path.exists());

        // 再次加载得到同样的内容
        assert_eq!(StudioConfig::load(&path), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(
            &path,
            r##"{ "capture": { "facing": "back" }, "overlay": { "connector_color": "#00FF00" } }"##,
        )
        .unwrap();

        let config = StudioConfig::load(&path);
        assert_eq!(config.capture.facing, FacingMode::Back);
        assert_eq!(config.capture.constraints, CaptureConstraints::default());
        assert_eq!(config.overlay.connector_color, "#00FF00");
        assert_eq!(config.overlay.marker_radius, 10.0);
        assert_eq!(config.inference.num_poses, 2);
    }

    #[test]
    fn test_unparsable_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(StudioConfig::load(&path), StudioConfig::default());
    }

    #[test]
    fn test_args_override() {
        let mut config = StudioConfig::default();
        config.apply_args(&args(&[
            "--facing",
            "back",
            "--num-poses",
            "1",
            "--cuda",
            "--device-id",
            "2",
        ]));
        assert_eq!(config.capture.facing, FacingMode::Back);
        assert_eq!(config.inference.num_poses, 1);
        assert_eq!(config.inference.delegate, Delegate::Cuda);
        assert_eq!(config.inference.device_id, 2);

        let mut config = StudioConfig::default();
        config.apply_args(&args(&["--trt", "--cuda"]));
        assert_eq!(config.inference.delegate, Delegate::TensorRt);
    }

    #[test]
    fn test_default_args() {
        let a = args(&[]);
        assert_eq!(a.model, "models/pose_landmark_full.onnx");
        assert_eq!(a.config, "studio_config.json");
        assert!(a.facing.is_none());
        assert!(!a.list);
    }

    #[test]
    fn test_validate() {
        assert!(StudioConfig::default().validate().is_ok());

        let mut config = StudioConfig::default();
        config.pipeline.playback_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = StudioConfig::default();
        config.overlay.min_visibility = 2.0;
        assert!(matches!(config.validate(), Err(StudioError::Config(_))));
    }
}
