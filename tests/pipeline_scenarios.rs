// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 管线场景测试: 假摄像头 + 假推理服务, 手动驱动 on_refresh

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};

use motion_studio::angles::JointKey;
use motion_studio::capture::{
    CameraBackend, CameraDevice, CaptureConstraints, FacingMode, Resolution, VideoStream,
};
use motion_studio::inference::{
    BoxedLandmarker, InferenceOptions, ModelLoader, PoseLandmarker, TimestampGuard,
};
use motion_studio::pipeline::{FaultKind, PipelineState, PosePipeline};
use motion_studio::scheduler::TickOutcome;
use motion_studio::{Landmark, PoseLandmarkId, Result, Skeleton, StudioConfig, StudioError};

#[derive(Default)]
struct CameraStats {
    open: AtomicUsize,
    max_open: AtomicUsize,
    facings: Mutex<Vec<FacingMode>>,
}

#[derive(Clone)]
struct StreamPlan {
    period: Duration,
    resolution: Resolution,
    fail_after: Option<u64>,
    never_deliver: bool,
    resize_after: Option<(u64, Resolution)>,
}

impl Default for StreamPlan {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(5),
            resolution: Resolution::new(320, 240),
            fail_after: None,
            never_deliver: false,
            resize_after: None,
        }
    }
}

struct FakeCamera {
    stats: Arc<CameraStats>,
    available: Arc<AtomicBool>,
    plan: StreamPlan,
}

impl CameraBackend for FakeCamera {
    fn list_devices(&self) -> Result<Vec<CameraDevice>> {
        Ok(vec![CameraDevice {
            index: 0,
            name: "Fake Camera".into(),
            description: "scripted".into(),
        }])
    }

    fn acquire(
        &self,
        facing: FacingMode,
        _constraints: &CaptureConstraints,
    ) -> Result<Box<dyn VideoStream>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StudioError::DeviceUnavailable("permission denied".into()));
        }
        let open = self.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_open.fetch_max(open, Ordering::SeqCst);
        self.stats.facings.lock().unwrap().push(facing);
        Ok(Box::new(FakeStream {
            stats: self.stats.clone(),
            plan: self.plan.clone(),
            reads: 0,
            stopped: false,
        }))
    }
}

struct FakeStream {
    stats: Arc<CameraStats>,
    plan: StreamPlan,
    reads: u64,
    stopped: bool,
}

impl VideoStream for FakeStream {
    fn name(&self) -> String {
        "Fake Camera".into()
    }

    fn resolution(&self) -> Resolution {
        self.plan.resolution
    }

    fn frame_rate(&self) -> u32 {
        30
    }

    fn read_frame(&mut self) -> Result<RgbImage> {
        if self.reads > 0 || self.plan.never_deliver {
            std::thread::sleep(self.plan.period);
        }
        self.reads += 1;

        if self.plan.never_deliver {
            return Err(StudioError::InferenceTick("no signal".into()));
        }
        if let Some(limit) = self.plan.fail_after {
            if self.reads > limit {
                return Err(StudioError::InferenceTick("unplugged".into()));
            }
        }
        let resolution = match self.plan.resize_after {
            Some((after, resolution)) if self.reads > after => resolution,
            _ => self.plan.resolution,
        };
        Ok(RgbImage::from_pixel(
            resolution.width,
            resolution.height,
            Rgb([40, 40, 40]),
        ))
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stats.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct LandmarkerCalls {
    timestamps: Mutex<Vec<u64>>,
    invalidated: AtomicBool,
    disposed: AtomicUsize,
}

struct FakeLandmarker {
    calls: Arc<LandmarkerCalls>,
    options: InferenceOptions,
    guard: TimestampGuard,
    disposed: bool,
}

impl FakeLandmarker {
    fn boxed(calls: &Arc<LandmarkerCalls>) -> BoxedLandmarker {
        Box::new(Self {
            calls: calls.clone(),
            options: InferenceOptions::default(),
            guard: TimestampGuard::default(),
            disposed: false,
        })
    }
}

impl PoseLandmarker for FakeLandmarker {
    fn infer(&mut self, _frame: &RgbImage, timestamp_us: u64) -> Result<Vec<Skeleton>> {
        if self.disposed || self.calls.invalidated.load(Ordering::SeqCst) {
            return Err(StudioError::HandleInvalidated);
        }
        self.guard.check(timestamp_us)?;
        self.calls.timestamps.lock().unwrap().push(timestamp_us);
        Ok(vec![Skeleton::empty()
            .with(PoseLandmarkId::LeftShoulder, Landmark::new(0.4, 0.3))
            .with(PoseLandmarkId::LeftElbow, Landmark::new(0.4, 0.5))
            .with(PoseLandmarkId::LeftWrist, Landmark::new(0.6, 0.5))])
    }

    fn options(&self) -> &InferenceOptions {
        &self.options
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.calls.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

struct Harness {
    pipeline: PosePipeline,
    camera: Arc<CameraStats>,
    available: Arc<AtomicBool>,
    calls: Arc<LandmarkerCalls>,
}

fn harness_with(plan: StreamPlan, config: StudioConfig) -> Harness {
    let camera = Arc::new(CameraStats::default());
    let available = Arc::new(AtomicBool::new(true));
    let backend = Arc::new(FakeCamera {
        stats: camera.clone(),
        available: available.clone(),
        plan,
    });
    let pipeline = PosePipeline::new(backend, &config).unwrap();
    Harness {
        pipeline,
        camera,
        available,
        calls: Arc::new(LandmarkerCalls::default()),
    }
}

/// 已挂载推理句柄, 处于 Ready
fn ready(plan: StreamPlan) -> Harness {
    let mut h = harness_with(plan, StudioConfig::default());
    h.pipeline.attach_landmarker(FakeLandmarker::boxed(&h.calls));
    assert_eq!(*h.pipeline.state(), PipelineState::Ready);
    h
}

/// 反复刷新直到条件满足
fn refresh_until<F>(pipeline: &mut PosePipeline, mut done: F) -> bool
where
    F: FnMut(&PosePipeline, &TickOutcome) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let outcome = pipeline.on_refresh(Instant::now());
        if done(pipeline, &outcome) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

fn process_frames(pipeline: &mut PosePipeline, count: usize) {
    let mut processed = 0;
    assert!(refresh_until(pipeline, |_, outcome| {
        if matches!(outcome, TickOutcome::Processed(_)) {
            processed += 1;
        }
        processed >= count
    }));
}

#[test]
fn start_before_initialize_is_rejected() {
    let mut h = harness_with(StreamPlan::default(), StudioConfig::default());
    let err = h.pipeline.start().unwrap_err();
    assert!(matches!(
        err,
        StudioError::InvalidState {
            state: "Uninitialized",
            action: "start"
        }
    ));
    assert_eq!(h.camera.open.load(Ordering::SeqCst), 0);
    assert!(matches!(
        h.pipeline.on_refresh(Instant::now()),
        TickOutcome::Halted
    ));
}

#[test]
fn repeated_frame_is_inferred_once() {
    let mut h = ready(StreamPlan {
        period: Duration::from_millis(400),
        ..Default::default()
    });
    h.pipeline.start().unwrap();

    let outcome = h.pipeline.on_refresh(Instant::now());
    let report = match outcome {
        TickOutcome::Processed(report) => report,
        other => panic!("expected a processed tick, got {:?}", other),
    };
    assert_eq!(report.skeletons, 1);
    let elbow = report.angles.get(JointKey::LeftElbow).unwrap();
    assert!((elbow - 90.0).abs() < 1e-3);

    for _ in 0..10 {
        assert!(matches!(
            h.pipeline.on_refresh(Instant::now()),
            TickOutcome::Skipped
        ));
    }
    assert_eq!(h.calls.timestamps.lock().unwrap().len(), 1);

    let status = h.pipeline.status();
    assert_eq!(status.stats.inferences, 1);
    assert_eq!(status.stats.skipped, 10);
    assert_eq!(status.angles.get(JointKey::LeftElbow), Some(elbow));
}

#[test]
fn surface_follows_native_video_size() {
    let mut h = ready(StreamPlan {
        resize_after: Some((3, Resolution::new(160, 120))),
        ..Default::default()
    });
    h.pipeline.start().unwrap();
    assert_eq!(h.pipeline.surface().dimensions(), (320, 240));

    assert!(refresh_until(&mut h.pipeline, |p, _| {
        p.surface().dimensions() == (160, 120)
    }));
    assert_eq!(
        h.pipeline.status().resolution,
        Some(Resolution::new(160, 120))
    );
}

#[test]
fn stop_tears_everything_down() {
    let mut h = ready(StreamPlan::default());
    h.pipeline.start().unwrap();
    process_frames(&mut h.pipeline, 2);
    assert_eq!(h.camera.open.load(Ordering::SeqCst), 1);
    assert_eq!(h.pipeline.capture().active_tracks(), 1);

    h.pipeline.stop();
    assert_eq!(*h.pipeline.state(), PipelineState::Ready);
    assert_eq!(h.camera.open.load(Ordering::SeqCst), 0);
    assert_eq!(h.pipeline.capture().active_tracks(), 0);
    assert_eq!(h.pipeline.status().angles.determined_count(), 0);

    let calls = h.calls.timestamps.lock().unwrap().len();
    for _ in 0..5 {
        assert!(matches!(
            h.pipeline.on_refresh(Instant::now()),
            TickOutcome::Halted
        ));
    }
    assert_eq!(h.calls.timestamps.lock().unwrap().len(), calls);

    // 重复停止无副作用
    h.pipeline.stop();
    assert_eq!(*h.pipeline.state(), PipelineState::Ready);
}

#[test]
fn timestamps_increase_across_restarts() {
    let mut h = ready(StreamPlan::default());
    for _ in 0..3 {
        h.pipeline.start().unwrap();
        process_frames(&mut h.pipeline, 3);
        h.pipeline.stop();
    }
    h.pipeline.toggle().unwrap();
    process_frames(&mut h.pipeline, 2);
    h.pipeline.toggle().unwrap();
    assert_eq!(*h.pipeline.state(), PipelineState::Ready);

    let timestamps = h.calls.timestamps.lock().unwrap().clone();
    assert_eq!(timestamps.len(), 11);
    assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(h.pipeline.status().stats.failed, 0);
}

#[test]
fn facing_switch_never_holds_two_devices() {
    let mut h = ready(StreamPlan::default());
    h.pipeline.start().unwrap();
    process_frames(&mut h.pipeline, 1);

    for _ in 0..3 {
        h.pipeline.switch_facing().unwrap();
        process_frames(&mut h.pipeline, 1);
    }

    assert_eq!(h.camera.max_open.load(Ordering::SeqCst), 1);
    assert_eq!(h.camera.open.load(Ordering::SeqCst), 1);
    assert_eq!(
        *h.camera.facings.lock().unwrap(),
        vec![
            FacingMode::Front,
            FacingMode::Back,
            FacingMode::Front,
            FacingMode::Back
        ]
    );
    assert!(matches!(
        h.pipeline.state(),
        PipelineState::Running {
            facing: FacingMode::Back,
            session_id: 4
        }
    ));

    // 未运行时只改变偏好
    h.pipeline.stop();
    h.pipeline.switch_facing().unwrap();
    assert_eq!(h.pipeline.facing(), FacingMode::Front);
    assert_eq!(h.camera.open.load(Ordering::SeqCst), 0);
}

#[test]
fn invalidated_handle_halts_loop() {
    let mut h = ready(StreamPlan::default());
    h.pipeline.start().unwrap();
    process_frames(&mut h.pipeline, 1);

    h.calls.invalidated.store(true, Ordering::SeqCst);
    assert!(refresh_until(&mut h.pipeline, |_, outcome| {
        matches!(outcome, TickOutcome::Invalidated)
    }));

    assert_eq!(*h.pipeline.state(), PipelineState::Uninitialized);
    assert_eq!(h.camera.open.load(Ordering::SeqCst), 0);
    assert!(matches!(
        h.pipeline.on_refresh(Instant::now()),
        TickOutcome::Halted
    ));
    assert!(matches!(
        h.pipeline.start(),
        Err(StudioError::InvalidState { .. })
    ));
}

#[test]
fn denied_camera_can_be_retried() {
    let mut h = ready(StreamPlan::default());
    h.available.store(false, Ordering::SeqCst);

    let err = h.pipeline.start().unwrap_err();
    assert!(matches!(err, StudioError::DeviceUnavailable(_)));
    let status = h.pipeline.status();
    assert_eq!(status.error().map(|f| f.kind), Some(FaultKind::DeviceUnavailable));
    assert!(status.can_toggle());
    assert!(!status.is_running());

    h.available.store(true, Ordering::SeqCst);
    h.pipeline.start().unwrap();
    assert!(h.pipeline.status().is_running());
    process_frames(&mut h.pipeline, 1);
}

#[test]
fn missing_first_frame_is_a_playback_error() {
    let mut config = StudioConfig::default();
    config.pipeline.playback_timeout_ms = 1000;
    let mut h = harness_with(
        StreamPlan {
            never_deliver: true,
            ..Default::default()
        },
        config,
    );
    h.pipeline.attach_landmarker(FakeLandmarker::boxed(&h.calls));

    let err = h.pipeline.start().unwrap_err();
    assert!(matches!(err, StudioError::Playback(_)));
    assert_eq!(
        h.pipeline.status().error().map(|f| f.kind),
        Some(FaultKind::Playback)
    );
    assert_eq!(h.camera.open.load(Ordering::SeqCst), 0);
    assert_eq!(h.pipeline.capture().active_tracks(), 0);
    assert!(!h.pipeline.capture().is_open());
}

#[test]
fn lost_camera_moves_to_error() {
    let mut h = ready(StreamPlan {
        fail_after: Some(3),
        ..Default::default()
    });
    h.pipeline.start().unwrap();

    assert!(refresh_until(&mut h.pipeline, |p, _| {
        matches!(p.state(), PipelineState::Error(_))
    }));
    let status = h.pipeline.status();
    assert_eq!(status.error().map(|f| f.kind), Some(FaultKind::DeviceUnavailable));
    assert_eq!(status.angles.determined_count(), 0);
    assert_eq!(h.camera.open.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_model_load_blocks_start() {
    let mut h = harness_with(StreamPlan::default(), StudioConfig::default());
    let loader = ModelLoader::spawn(|| Err(StudioError::ModelInit("corrupt weights".into()))).unwrap();
    h.pipeline.initialize(loader).unwrap();
    assert!(h.pipeline.status().is_loading());
    assert!(!h.pipeline.status().can_toggle());

    assert!(refresh_until(&mut h.pipeline, |p, _| {
        !matches!(p.state(), PipelineState::Initializing)
    }));
    let status = h.pipeline.status();
    assert_eq!(status.error().map(|f| f.kind), Some(FaultKind::ModelInit));
    assert!(!status.can_toggle());
    assert!(matches!(
        h.pipeline.start(),
        Err(StudioError::InvalidState { .. })
    ));

    // 重新初始化成功后可以启动
    let calls = h.calls.clone();
    let loader = ModelLoader::spawn(move || Ok(FakeLandmarker::boxed(&calls))).unwrap();
    h.pipeline.initialize(loader).unwrap();
    assert!(refresh_until(&mut h.pipeline, |p, _| {
        *p.state() == PipelineState::Ready
    }));
    h.pipeline.start().unwrap();
    process_frames(&mut h.pipeline, 1);
}

#[test]
fn invalid_options_during_load_block_start() {
    let mut h = harness_with(StreamPlan::default(), StudioConfig::default());
    let loader = ModelLoader::spawn(|| {
        Err(StudioError::Config(
            "min_detection_confidence must be within [0, 1]".into(),
        ))
    })
    .unwrap();
    h.pipeline.initialize(loader).unwrap();

    assert!(refresh_until(&mut h.pipeline, |p, _| {
        !matches!(p.state(), PipelineState::Initializing)
    }));
    let status = h.pipeline.status();
    assert_eq!(status.error().map(|f| f.kind), Some(FaultKind::ModelInit));
    assert!(!status.can_toggle());
    assert!(matches!(
        h.pipeline.toggle(),
        Err(StudioError::InvalidState { .. })
    ));
    assert_eq!(h.camera.max_open.load(Ordering::SeqCst), 0);
}

#[test]
fn shutdown_disposes_handle_once() {
    let mut h = ready(StreamPlan::default());
    h.pipeline.start().unwrap();
    process_frames(&mut h.pipeline, 1);

    h.pipeline.shutdown();
    assert_eq!(*h.pipeline.state(), PipelineState::Uninitialized);
    assert_eq!(h.camera.open.load(Ordering::SeqCst), 0);
    assert_eq!(h.calls.disposed.load(Ordering::SeqCst), 1);

    h.pipeline.shutdown();
    drop(h.pipeline);
    assert_eq!(h.calls.disposed.load(Ordering::SeqCst), 1);
}

#[test]
fn reinitialize_disposes_previous_handle() {
    let mut h = ready(StreamPlan::default());
    h.pipeline.start().unwrap();
    process_frames(&mut h.pipeline, 1);

    let calls = Arc::new(LandmarkerCalls::default());
    h.pipeline.attach_landmarker(FakeLandmarker::boxed(&calls));
    assert_eq!(h.calls.disposed.load(Ordering::SeqCst), 1);
    assert_eq!(*h.pipeline.state(), PipelineState::Ready);
    assert_eq!(h.camera.open.load(Ordering::SeqCst), 0);

    h.pipeline.start().unwrap();
    process_frames(&mut h.pipeline, 1);
    assert_eq!(calls.timestamps.lock().unwrap().len(), 1);
}
