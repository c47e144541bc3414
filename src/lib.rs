// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 实时姿态工作室 (Motion Studio)
//!
//! 摄像头 → 姿态推理 → 关节角度 → 骨架叠加层, 按显示刷新逐帧驱动。
pub mod angles; // 关节角度
pub mod capture; // 摄像头采集
pub mod config; // 命令行与配置文件
pub mod error;
pub mod inference; // 姿态推理服务
pub mod overlay; // 叠加层渲染
pub mod pipeline; // 管线状态机
pub mod pose; // 关键点数据模型
pub mod scheduler; // 帧调度

pub use crate::angles::{calculate_angle, JointAngleSet, JointKey};
pub use crate::config::{Args, StudioConfig};
pub use crate::error::{Result, StudioError};
pub use crate::pipeline::{PipelineState, PipelineStatus, PosePipeline};
pub use crate::pose::{Landmark, PoseLandmarkId, Skeleton};
