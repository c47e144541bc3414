// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 帧调度器 (Frame Scheduler)
//!
//! 每次显示刷新调用一次 `tick`:
//! 没有新帧 → 跳过; 有新帧 → 推理 → 关节角度 → 叠加层, 同一 tick 内按顺序完成。
//! 单线程, 不加锁; 下一次 tick 的检查一定在上一次 tick 完成之后。

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::angles::JointAngleSet;
use crate::capture::FrameSource;
use crate::error::StudioError;
use crate::inference::PoseLandmarker;
use crate::overlay::OverlayRenderer;

/// 视频时钟: 记录最后处理的呈现时间与最后发出的推理时间戳
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    origin: Option<Instant>,
    last_presentation: Option<Duration>,
    last_timestamp_us: Option<u64>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 呈现时间与上次处理的不同才算新帧
    pub fn is_new_frame(&self, presentation_time: Duration) -> bool {
        self.last_presentation != Some(presentation_time)
    }

    pub fn mark_processed(&mut self, presentation_time: Duration) {
        self.last_presentation = Some(presentation_time);
    }

    /// 下一个推理时间戳 (微秒): 取自首次启动以来的经过时间, 保证严格递增
    pub fn next_timestamp(&mut self, now: Instant) -> u64 {
        let origin = *self.origin.get_or_insert(now);
        let elapsed = now.saturating_duration_since(origin).as_micros() as u64;
        let ts = match self.last_timestamp_us {
            Some(last) if elapsed <= last => last + 1,
            _ => elapsed,
        };
        self.last_timestamp_us = Some(ts);
        ts
    }

    pub fn last_timestamp_us(&self) -> Option<u64> {
        self.last_timestamp_us
    }

    /// 新的采集会话: 呈现时间从头计, 时间戳继续递增
    pub fn restart(&mut self) {
        self.last_presentation = None;
    }

    /// 换了新的推理句柄: 全部清零
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 待执行 tick 的句柄; 取消是幂等的
#[derive(Debug, Clone)]
pub struct LoopHandle {
    armed: Rc<Cell<bool>>,
}

impl LoopHandle {
    fn new() -> Self {
        Self {
            armed: Rc::new(Cell::new(true)),
        }
    }

    pub fn cancel(&self) {
        self.armed.set(false);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.get()
    }
}

/// 单次 tick 的处理结果
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub timestamp_us: u64,
    pub presentation_time: Duration,
    pub skeletons: usize,
    pub angles: JointAngleSet,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// 循环未运行 (没有待执行的 tick)
    Halted,
    /// 没有新帧
    Skipped,
    Processed(TickReport),
    /// 单帧失败, 循环继续
    Failed(StudioError),
    /// 推理句柄失效, 循环停止
    Invalidated,
}

/// 统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    pub inferences: u64,
    pub skipped: u64,
    pub failed: u64,
}

pub struct FrameScheduler {
    clock: FrameClock,
    pending: Option<LoopHandle>,
    angles: JointAngleSet,
    min_visibility: f32,
    stats: TickStats,
}

impl FrameScheduler {
    pub fn new(min_visibility: f32) -> Self {
        Self {
            clock: FrameClock::new(),
            pending: None,
            angles: JointAngleSet::undetermined(),
            min_visibility,
            stats: TickStats::default(),
        }
    }

    /// 启动循环; 已有的待执行 tick 先取消
    pub fn start(&mut self) -> LoopHandle {
        self.cancel();
        self.clock.restart();
        let handle = LoopHandle::new();
        self.pending = Some(handle.clone());
        handle
    }

    /// 取消待执行的 tick, 可重复调用
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| h.is_armed())
    }

    pub fn angles(&self) -> &JointAngleSet {
        &self.angles
    }

    pub fn reset_angles(&mut self) {
        self.angles.reset();
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    /// 推理句柄更换后调用
    pub fn reset_clock(&mut self) {
        self.clock.reset();
    }

    pub fn tick<L>(
        &mut self,
        now: Instant,
        source: &dyn FrameSource,
        landmarker: Option<&mut L>,
        renderer: &mut OverlayRenderer,
    ) -> TickOutcome
    where
        L: PoseLandmarker + ?Sized,
    {
        if !self.is_running() {
            return TickOutcome::Halted;
        }
        let Some(landmarker) = landmarker else {
            self.cancel();
            return TickOutcome::Halted;
        };
        self.stats.ticks += 1;

        let frame = match source.current_frame() {
            Some(frame) if self.clock.is_new_frame(frame.presentation_time()) => frame,
            _ => {
                self.stats.skipped += 1;
                return TickOutcome::Skipped;
            }
        };

        let presentation_time = frame.presentation_time();
        let timestamp_us = self.clock.next_timestamp(now);

        match landmarker.infer(frame.image(), timestamp_us) {
            Ok(skeletons) => {
                self.angles = JointAngleSet::from_primary(&skeletons, self.min_visibility);
                let (w, h) = frame.image().dimensions();
                renderer.resize(w, h);
                renderer.render(frame.image(), &skeletons);

                self.clock.mark_processed(presentation_time);
                self.stats.inferences += 1;
                TickOutcome::Processed(TickReport {
                    timestamp_us,
                    presentation_time,
                    skeletons: skeletons.len(),
                    angles: self.angles,
                })
            }
            Err(StudioError::HandleInvalidated) => {
                tracing::warn!("⚠️ 推理句柄已失效, 停止循环");
                self.cancel();
                self.angles.reset();
                TickOutcome::Invalidated
            }
            Err(e) => {
                tracing::error!("❌ 第 {} 帧推理失败: {}", self.stats.ticks, e);
                self.angles.reset();
                self.clock.mark_processed(presentation_time);
                self.stats.failed += 1;
                TickOutcome::Failed(e)
            }
        }
    }
}
