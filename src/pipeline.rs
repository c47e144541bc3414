// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 姿态管线 (Pose Pipeline)
//!
//! 把采集、推理、调度和叠加层串起来的状态机:
//!
//! ```text
//! Uninitialized → Initializing → Ready ⇄ Running
//!        ↑                         ↘      ↙
//!        └──── (句柄失效) ──────── Error
//! ```
//!
//! 所有状态变更都发生在调用方线程 (显示刷新线程), 不加锁。

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::angles::JointAngleSet;
use crate::capture::{CameraBackend, CaptureManager, FacingMode, Resolution};
use crate::config::StudioConfig;
use crate::error::{Result, StudioError};
use crate::inference::{BoxedLandmarker, ModelLoader};
use crate::overlay::{OverlayRenderer, OverlayStyle, Surface};
use crate::scheduler::{FrameScheduler, TickOutcome, TickStats};

/// 故障类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// 模型加载失败, 需要重新初始化
    ModelInit,
    /// 摄像头不可用, 可以重试 start
    DeviceUnavailable,
    /// 首帧超时, 可以重试 start
    Playback,
    /// 配置无效, 改配置前重试无意义
    Config,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFault {
    pub kind: FaultKind,
    pub message: String,
}

impl PipelineFault {
    fn from_error(err: &StudioError) -> Self {
        let kind = match err {
            StudioError::ModelInit(_)
            | StudioError::InferenceOrder { .. }
            | StudioError::InferenceTick(_)
            | StudioError::HandleInvalidated => FaultKind::ModelInit,
            StudioError::Playback(_) => FaultKind::Playback,
            StudioError::DeviceUnavailable(_) | StudioError::Io(_) => FaultKind::DeviceUnavailable,
            StudioError::Config(_) | StudioError::InvalidState { .. } => FaultKind::Config,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }

    /// 模型加载阶段的任何错误都按加载失败处理
    fn model_init(err: &StudioError) -> Self {
        Self {
            kind: FaultKind::ModelInit,
            message: err.to_string(),
        }
    }

    /// 用户能否直接重试 start
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FaultKind::DeviceUnavailable | FaultKind::Playback)
    }
}

impl fmt::Display for PipelineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Initializing,
    Ready,
    Running { facing: FacingMode, session_id: u64 },
    Error(PipelineFault),
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Uninitialized => "Uninitialized",
            PipelineState::Initializing => "Initializing",
            PipelineState::Ready => "Ready",
            PipelineState::Running { .. } => "Running",
            PipelineState::Error(_) => "Error",
        }
    }
}

/// 给界面用的状态快照
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub angles: JointAngleSet,
    pub facing: FacingMode,
    pub resolution: Option<Resolution>,
    pub stats: TickStats,
}

impl PipelineStatus {
    pub fn is_running(&self) -> bool {
        matches!(self.state, PipelineState::Running { .. })
    }

    pub fn is_loading(&self) -> bool {
        self.state == PipelineState::Initializing
    }

    pub fn error(&self) -> Option<&PipelineFault> {
        match &self.state {
            PipelineState::Error(fault) => Some(fault),
            _ => None,
        }
    }

    /// 开始/停止按钮是否可用
    pub fn can_toggle(&self) -> bool {
        match &self.state {
            PipelineState::Ready | PipelineState::Running { .. } => true,
            PipelineState::Error(fault) => fault.is_retryable(),
            _ => false,
        }
    }
}

pub struct PosePipeline {
    state: PipelineState,
    capture: CaptureManager,
    landmarker: Option<BoxedLandmarker>,
    loader: Option<ModelLoader>,
    scheduler: FrameScheduler,
    renderer: OverlayRenderer,
    facing: FacingMode,
    playback_timeout: Duration,
    pending_resize: Rc<Cell<Option<Resolution>>>,
}

impl PosePipeline {
    pub fn new(backend: Arc<dyn CameraBackend>, config: &StudioConfig) -> Result<Self> {
        config.validate()?;
        let style = OverlayStyle::from_config(&config.overlay)?;
        let constraints = config.capture.constraints.clone();
        let initial = constraints.resolution();

        let pending_resize = Rc::new(Cell::new(None));
        let mut capture = CaptureManager::new(backend, constraints);
        let slot = pending_resize.clone();
        capture.on_metadata(move |metadata| slot.set(Some(metadata.resolution)));

        Ok(Self {
            state: PipelineState::Uninitialized,
            capture,
            landmarker: None,
            loader: None,
            scheduler: FrameScheduler::new(config.pipeline.min_visibility),
            renderer: OverlayRenderer::new(initial.width, initial.height, style),
            facing: config.capture.facing,
            playback_timeout: Duration::from_millis(config.pipeline.playback_timeout_ms),
            pending_resize,
        })
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    pub fn surface(&self) -> &Surface {
        self.renderer.surface()
    }

    pub fn capture(&self) -> &CaptureManager {
        &self.capture
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            state: self.state.clone(),
            angles: *self.scheduler.angles(),
            facing: self.facing,
            resolution: self.capture.metadata().map(|m| m.resolution),
            stats: self.scheduler.stats(),
        }
    }

    /// 后台加载模型; 已有句柄先停止并释放
    pub fn initialize(&mut self, loader: ModelLoader) -> Result<()> {
        if self.state == PipelineState::Initializing {
            return Err(self.invalid("initialize"));
        }
        self.teardown();
        self.release_landmarker();
        tracing::info!("⏳ 正在加载姿态模型...");
        self.loader = Some(loader);
        self.state = PipelineState::Initializing;
        Ok(())
    }

    /// 同步挂载一个已经就绪的推理句柄
    pub fn attach_landmarker(&mut self, landmarker: BoxedLandmarker) {
        self.teardown();
        self.release_landmarker();
        self.loader = None;
        self.landmarker = Some(landmarker);
        self.scheduler.reset_clock();
        self.state = PipelineState::Ready;
        tracing::info!("✅ 姿态模型已就绪");
    }

    /// 查询后台加载结果; 仍在加载时返回 Ok(false)
    pub fn poll_initialization(&mut self) -> Result<bool> {
        if self.state != PipelineState::Initializing {
            return Ok(false);
        }
        let Some(loader) = self.loader.as_mut() else {
            return Ok(false);
        };
        match loader.poll() {
            None => Ok(false),
            Some(Ok(landmarker)) => {
                self.attach_landmarker(landmarker);
                Ok(true)
            }
            Some(Err(e)) => {
                tracing::error!("❌ 模型加载失败: {}", e);
                self.loader = None;
                self.state = PipelineState::Error(PipelineFault::model_init(&e));
                Err(e)
            }
        }
    }

    /// 打开摄像头并启动帧循环
    pub fn start(&mut self) -> Result<()> {
        match &self.state {
            PipelineState::Running { .. } => return Ok(()),
            PipelineState::Ready => {}
            PipelineState::Error(fault) if fault.is_retryable() && self.landmarker.is_some() => {}
            _ => return Err(self.invalid("start")),
        }

        tracing::info!("🎬 启动采集: {}", self.facing.label());
        match self.capture.open(self.facing, self.playback_timeout) {
            Ok(metadata) => {
                self.apply_pending_resize();
                self.scheduler.start();
                self.state = PipelineState::Running {
                    facing: metadata.facing,
                    session_id: metadata.session_id,
                };
                Ok(())
            }
            Err(e) => {
                tracing::error!("❌ 启动失败: {}", e);
                self.teardown();
                self.state = PipelineState::Error(PipelineFault::from_error(&e));
                Err(e)
            }
        }
    }

    /// 停止循环并释放摄像头; 不在运行时什么都不做
    pub fn stop(&mut self) {
        if matches!(self.state, PipelineState::Running { .. }) {
            tracing::info!("⏹️ 停止采集");
            self.teardown();
            self.state = PipelineState::Ready;
        }
    }

    pub fn toggle(&mut self) -> Result<()> {
        if matches!(self.state, PipelineState::Running { .. }) {
            self.stop();
            Ok(())
        } else {
            self.start()
        }
    }

    /// 切换前后摄像头; 运行中时先完整关闭再按新朝向启动
    pub fn switch_facing(&mut self) -> Result<()> {
        self.facing = self.facing.toggled();
        tracing::info!("🔄 切换摄像头 → {}", self.facing.label());
        if matches!(self.state, PipelineState::Running { .. }) {
            self.teardown();
            self.state = PipelineState::Ready;
            self.start()?;
        }
        Ok(())
    }

    /// 每次显示刷新调用一次
    pub fn on_refresh(&mut self, now: Instant) -> TickOutcome {
        if let Err(e) = self.poll_initialization() {
            tracing::debug!("模型加载结果: {}", e);
        }

        if matches!(self.state, PipelineState::Running { .. }) {
            if let Err(e) = self.capture.poll() {
                tracing::error!("❌ 采集中断: {}", e);
                self.teardown();
                self.state = PipelineState::Error(PipelineFault::from_error(&e));
                return TickOutcome::Halted;
            }
        }
        self.apply_pending_resize();

        let outcome = self.scheduler.tick(
            now,
            &self.capture,
            self.landmarker.as_deref_mut(),
            &mut self.renderer,
        );

        match &outcome {
            TickOutcome::Invalidated => {
                self.teardown();
                self.landmarker = None;
                self.scheduler.reset_clock();
                self.state = PipelineState::Uninitialized;
            }
            TickOutcome::Processed(report) => {
                tracing::trace!(
                    "tick ts={}us skeletons={} angles={}",
                    report.timestamp_us,
                    report.skeletons,
                    report.angles.determined_count()
                );
            }
            _ => {}
        }
        outcome
    }

    /// 卸载: 停止一切并释放推理句柄, 可重复调用
    pub fn shutdown(&mut self) {
        self.teardown();
        self.release_landmarker();
        self.loader = None;
        if self.state != PipelineState::Uninitialized {
            let stats = self.scheduler.stats();
            tracing::debug!(
                "📊 ticks={} inferences={} skipped={} failed={}",
                stats.ticks,
                stats.inferences,
                stats.skipped,
                stats.failed
            );
            tracing::info!("👋 管线已关闭");
        }
        self.state = PipelineState::Uninitialized;
    }

    /// 唯一的拆除流程: 取消循环 → 关闭采集 → 清空派生状态
    fn teardown(&mut self) {
        self.scheduler.cancel();
        self.capture.close();
        self.scheduler.reset_angles();
        self.pending_resize.set(None);
    }

    fn release_landmarker(&mut self) {
        if let Some(mut landmarker) = self.landmarker.take() {
            landmarker.dispose();
        }
    }

    fn apply_pending_resize(&mut self) {
        if let Some(resolution) = self.pending_resize.take() {
            self.renderer.resize(resolution.width, resolution.height);
        }
    }

    fn invalid(&self, action: &'static str) -> StudioError {
        StudioError::InvalidState {
            state: self.state.name(),
            action,
        }
    }
}

impl Drop for PosePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
