// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 采集会话: 一路活动视频流 + 独立采集线程
//!
//! 设备句柄在采集线程内创建 (nokhwa 的 Camera 不是 Send),
//! 打开结果通过一次性通道回传。帧通道容量为 2,渲染端慢时丢弃最旧的帧,队列里始终是最新画面。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TrySendError};

use super::{CameraBackend, CaptureConstraints, FacingMode, FrameSource, Resolution, VideoFrame};
use crate::error::{Result, StudioError};

/// 连续读帧失败超过该次数视为设备丢失
const MAX_CONSECUTIVE_ERRORS: u32 = 30;

/// 等待设备打开的上限
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// 流元数据 (协商后的真实尺寸)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMetadata {
    pub session_id: u64,
    pub facing: FacingMode,
    pub device_name: String,
    pub resolution: Resolution,
    pub frame_rate: u32,
}

pub struct CaptureSession {
    metadata: StreamMetadata,
    frame_rx: Receiver<VideoFrame>,
    failure_rx: Receiver<String>,
    latest: Option<VideoFrame>,
    running: Arc<AtomicBool>,
    active_tracks: Arc<AtomicUsize>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// 打开设备并启动采集线程, 设备打开成功后才返回
    pub fn open(
        backend: Arc<dyn CameraBackend>,
        facing: FacingMode,
        constraints: &CaptureConstraints,
        session_id: u64,
    ) -> Result<Self> {
        constraints.validate()?;

        let (frame_tx, frame_rx) = bounded::<VideoFrame>(2);
        let (failure_tx, failure_rx) = bounded::<String>(1);
        let (setup_tx, setup_rx) = bounded::<Result<(String, Resolution, u32)>>(1);

        let running = Arc::new(AtomicBool::new(true));
        let active_tracks = Arc::new(AtomicUsize::new(0));

        let worker = {
            let stale_rx = frame_rx.clone();
            let running = running.clone();
            let active_tracks = active_tracks.clone();
            let constraints = constraints.clone();
            std::thread::Builder::new()
                .name(format!("capture-{}", session_id))
                .spawn(move || {
                    let mut stream = match backend.acquire(facing, &constraints) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = setup_tx.send(Err(e));
                            return;
                        }
                    };
                    active_tracks.fetch_add(1, Ordering::SeqCst);

                    if setup_tx
                        .send(Ok((stream.name(), stream.resolution(), stream.frame_rate())))
                        .is_err()
                    {
                        stream.stop();
                        active_tracks.fetch_sub(1, Ordering::SeqCst);
                        return;
                    }

                    tracing::debug!("🎥 采集线程启动 (session {})", session_id);
                    let started = Instant::now();
                    let mut sequence = 0u64;
                    let mut consecutive_errors = 0u32;

                    while running.load(Ordering::SeqCst) {
                        match stream.read_frame() {
                            Ok(image) => {
                                consecutive_errors = 0;
                                sequence += 1;
                                let frame = VideoFrame::new(image, started.elapsed(), sequence);
                                match frame_tx.try_send(frame) {
                                    Ok(_) => {}
                                    Err(TrySendError::Full(frame)) => {
                                        if let Ok(stale) = stale_rx.try_recv() {
                                            tracing::trace!(
                                                "渲染端繁忙, 丢弃旧帧 #{}",
                                                stale.sequence()
                                            );
                                        }
                                        // 只有本线程发送, 腾出一格后必定能放下
                                        let _ = frame_tx.try_send(frame);
                                    }
                                    Err(TrySendError::Disconnected(_)) => break,
                                }
                            }
                            Err(e) => {
                                consecutive_errors += 1;
                                tracing::debug!("采集错误 ({}): {}", consecutive_errors, e);
                                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                                    let _ = failure_tx.try_send(e.to_string());
                                    break;
                                }
                            }
                        }
                    }

                    stream.stop();
                    active_tracks.fetch_sub(1, Ordering::SeqCst);
                    tracing::debug!("🛑 采集线程退出 (session {})", session_id);
                })?
        };

        let opened = match setup_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(StudioError::DeviceUnavailable(format!(
                "{} camera did not open within {:?}",
                facing.label(),
                OPEN_TIMEOUT
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(StudioError::DeviceUnavailable(
                "capture thread exited before opening the device".into(),
            )),
        };

        let mut session = Self {
            metadata: StreamMetadata {
                session_id,
                facing,
                device_name: String::new(),
                resolution: constraints.resolution(),
                frame_rate: constraints.ideal_frame_rate,
            },
            frame_rx,
            failure_rx,
            latest: None,
            running,
            active_tracks,
            worker: Some(worker),
        };

        match opened {
            Ok((device_name, resolution, frame_rate)) => {
                session.metadata.device_name = device_name;
                session.metadata.resolution = resolution;
                session.metadata.frame_rate = frame_rate;
                Ok(session)
            }
            Err(e) => {
                session.close();
                Err(e)
            }
        }
    }

    pub fn metadata(&self) -> StreamMetadata {
        self.metadata.clone()
    }

    pub fn facing(&self) -> FacingMode {
        self.metadata.facing
    }

    pub fn id(&self) -> u64 {
        self.metadata.session_id
    }

    /// 仍持有设备的轨道数
    pub fn active_tracks(&self) -> usize {
        self.active_tracks.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.worker.is_some()
    }

    /// 取走所有已到达的帧, 只保留最新一帧
    ///
    /// 尺寸变化时返回新的元数据; 设备丢失时返回错误。
    pub fn poll(&mut self) -> Result<Option<StreamMetadata>> {
        if let Some(frame) = self.frame_rx.try_iter().last() {
            self.latest = Some(frame);
        }

        if let Ok(reason) = self.failure_rx.try_recv() {
            return Err(StudioError::DeviceUnavailable(reason));
        }

        Ok(self.refresh_metadata())
    }

    /// 阻塞等待第一帧 (视频流绑定后开始播放)
    pub fn wait_for_first_frame(&mut self, timeout: Duration) -> Result<StreamMetadata> {
        if self.latest.is_none() {
            let frame = match self.frame_rx.recv_timeout(timeout) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(StudioError::Playback(format!(
                        "no frame within {:?}",
                        timeout
                    )))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let reason = self
                        .failure_rx
                        .try_recv()
                        .unwrap_or_else(|_| "capture thread stopped".to_string());
                    return Err(StudioError::Playback(reason));
                }
            };
            self.latest = Some(frame);
        }
        self.refresh_metadata();
        Ok(self.metadata.clone())
    }

    fn refresh_metadata(&mut self) -> Option<StreamMetadata> {
        let resolution = self.latest.as_ref()?.resolution();
        if resolution == self.metadata.resolution {
            return None;
        }
        self.metadata.resolution = resolution;
        Some(self.metadata.clone())
    }

    /// 停止采集线程并释放设备, 可重复调用
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("❌ 采集线程 panic (session {})", self.metadata.session_id);
            }
            tracing::info!("📴 关闭采集会话 {}", self.metadata.session_id);
        }
        self.latest = None;
    }
}

impl FrameSource for CaptureSession {
    fn current_frame(&self) -> Option<&VideoFrame> {
        self.latest.as_ref()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}
