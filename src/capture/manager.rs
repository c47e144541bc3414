// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 采集管理器 - 同一时刻最多持有一路会话

use std::sync::Arc;
use std::time::Duration;

use super::{
    CameraBackend, CameraDevice, CaptureConstraints, CaptureSession, FacingMode, FrameSource,
    StreamMetadata, VideoFrame,
};
use crate::error::Result;

/// 元数据监听器 (打开时与尺寸变化时触发)
pub type MetadataListener = Box<dyn FnMut(&StreamMetadata)>;

pub struct CaptureManager {
    backend: Arc<dyn CameraBackend>,
    constraints: CaptureConstraints,
    session: Option<CaptureSession>,
    next_session_id: u64,
    listener: Option<MetadataListener>,
}

impl CaptureManager {
    pub fn new(backend: Arc<dyn CameraBackend>, constraints: CaptureConstraints) -> Self {
        Self {
            backend,
            constraints,
            session: None,
            next_session_id: 1,
            listener: None,
        }
    }

    pub fn list_devices(&self) -> Result<Vec<CameraDevice>> {
        self.backend.list_devices()
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }

    /// 注册元数据监听器 (替换已有的)
    pub fn on_metadata<F>(&mut self, listener: F)
    where
        F: FnMut(&StreamMetadata) + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    /// 打开新会话; 旧会话先完整关闭再请求新设备
    pub fn open(&mut self, facing: FacingMode, first_frame_timeout: Duration) -> Result<StreamMetadata> {
        self.close();

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let mut session =
            CaptureSession::open(self.backend.clone(), facing, &self.constraints, session_id)?;
        let metadata = session.wait_for_first_frame(first_frame_timeout)?;

        tracing::info!(
            "✅ 采集会话 {} 已就绪: {} [{}] {} @ {}fps",
            session_id,
            facing.label(),
            metadata.device_name,
            metadata.resolution,
            metadata.frame_rate
        );
        self.session = Some(session);
        self.notify(&metadata);
        Ok(metadata)
    }

    /// 关闭当前会话, 没有会话时什么都不做
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }

    /// 切换朝向: 先停旧流,再打开另一侧
    pub fn switch_facing(&mut self, first_frame_timeout: Duration) -> Result<StreamMetadata> {
        let facing = self
            .session
            .as_ref()
            .map(|s| s.facing().toggled())
            .unwrap_or_default();
        self.open(facing, first_frame_timeout)
    }

    /// 拉取最新帧; 尺寸变化时通知监听器
    pub fn poll(&mut self) -> Result<()> {
        let changed = match self.session.as_mut() {
            Some(session) => session.poll()?,
            None => None,
        };
        if let Some(metadata) = changed {
            tracing::info!("📐 视频尺寸变化: {}", metadata.resolution);
            self.notify(&metadata);
        }
        Ok(())
    }

    fn notify(&mut self, metadata: &StreamMetadata) {
        if let Some(listener) = self.listener.as_mut() {
            listener(metadata);
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn facing(&self) -> Option<FacingMode> {
        self.session.as_ref().map(|s| s.facing())
    }

    pub fn metadata(&self) -> Option<StreamMetadata> {
        self.session.as_ref().map(|s| s.metadata())
    }

    /// 当前仍持有设备的轨道数 (没有会话时为 0)
    pub fn active_tracks(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.active_tracks())
    }
}

impl FrameSource for CaptureManager {
    fn current_frame(&self) -> Option<&VideoFrame> {
        self.session.as_ref().and_then(|s| s.current_frame())
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        self.close();
    }
}
