// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 错误类型 (Error taxonomy)
//!
//! 初始化类错误 (设备/模型) 直接上报并阻断交互;
//! 单帧错误在循环内部吞掉,用回退值保证循环存活。

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StudioError>;

#[derive(Debug, Error)]
pub enum StudioError {
    /// 摄像头权限被拒绝或没有匹配的设备
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    /// 模型资源加载或推理后端初始化失败
    #[error("model initialization failed: {0}")]
    ModelInit(String),

    /// 时间戳未严格递增 (推理服务是有状态的跟踪器)
    #[error("inference timestamp {got}us is not after previous {last}us")]
    InferenceOrder { last: u64, got: u64 },

    /// 单帧推理/绘制失败
    #[error("inference tick failed: {0}")]
    InferenceTick(String),

    /// 视频流已绑定但迟迟没有第一帧
    #[error("video playback failed to start: {0}")]
    Playback(String),

    /// 推理句柄已释放
    #[error("inference handle has been disposed")]
    HandleInvalidated,

    #[error("config error: {0}")]
    Config(String),

    #[error("cannot {action} while pipeline is {state}")]
    InvalidState {
        state: &'static str,
        action: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StudioError {
    /// 是否属于初始化类错误 (需要用户介入)
    pub fn is_initialization(&self) -> bool {
        matches!(
            self,
            StudioError::DeviceUnavailable(_)
                | StudioError::ModelInit(_)
                | StudioError::Playback(_)
        )
    }
}
