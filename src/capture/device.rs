// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 摄像头设备后端
//!
//! 处理本地摄像头输入,支持 V4L2(Linux) / AVFoundation(macOS) / MediaFoundation(Windows)

use std::time::{Duration, Instant};

use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
};
use nokhwa::Camera;

use super::{CaptureConstraints, FacingMode, Resolution};
use crate::error::{Result, StudioError};

/// 可枚举的摄像头
#[derive(Debug, Clone, PartialEq)]
pub struct CameraDevice {
    pub index: u32,
    pub name: String,
    pub description: String,
}

/// 已打开的视频流 (在采集线程内创建与使用, 不要求 Send)
pub trait VideoStream {
    /// 设备名称
    fn name(&self) -> String;

    /// 实际协商得到的分辨率
    fn resolution(&self) -> Resolution;

    fn frame_rate(&self) -> u32;

    /// 阻塞读取下一帧
    fn read_frame(&mut self) -> Result<RgbImage>;

    /// 释放底层设备, 可重复调用
    fn stop(&mut self);
}

/// 设备后端
pub trait CameraBackend: Send + Sync {
    fn list_devices(&self) -> Result<Vec<CameraDevice>>;

    /// 按朝向与约束打开设备
    fn acquire(
        &self,
        facing: FacingMode,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn VideoStream>>;
}

/// 从设备列表中选出与朝向匹配的设备
///
/// 优先使用配置的索引,其次按名称关键字匹配,最后按位置 (前置=0, 后置=1)
pub fn resolve_facing(
    devices: &[CameraDevice],
    facing: FacingMode,
    configured: Option<u32>,
) -> Option<u32> {
    if let Some(index) = configured {
        return devices.iter().find(|d| d.index == index).map(|d| d.index);
    }

    let keywords: &[&str] = match facing {
        FacingMode::Front => &["front", "user", "facetime", "integrated"],
        FacingMode::Back => &["back", "rear", "environment", "world"],
    };
    let by_name = devices.iter().find(|d| {
        let name = d.name.to_lowercase();
        keywords.iter().any(|k| name.contains(k))
    });
    if let Some(device) = by_name {
        return Some(device.index);
    }

    let position = match facing {
        FacingMode::Front => 0,
        FacingMode::Back => 1,
    };
    devices.get(position).map(|d| d.index)
}

/// nokhwa 后端
#[derive(Debug, Clone, Default)]
pub struct NokhwaBackend {
    front_device: Option<u32>,
    back_device: Option<u32>,
}

impl NokhwaBackend {
    pub fn new(front_device: Option<u32>, back_device: Option<u32>) -> Self {
        Self {
            front_device,
            back_device,
        }
    }

    fn configured(&self, facing: FacingMode) -> Option<u32> {
        match facing {
            FacingMode::Front => self.front_device,
            FacingMode::Back => self.back_device,
        }
    }
}

impl CameraBackend for NokhwaBackend {
    fn list_devices(&self) -> Result<Vec<CameraDevice>> {
        let cameras = nokhwa::query(ApiBackend::Auto)
            .map_err(|e| StudioError::DeviceUnavailable(format!("query failed: {}", e)))?;

        Ok(cameras
            .iter()
            .enumerate()
            .map(|(position, info)| {
                let index = match info.index() {
                    CameraIndex::Index(i) => *i,
                    CameraIndex::String(_) => position as u32,
                };
                CameraDevice {
                    index,
                    name: info.human_name(),
                    description: info.description().to_string(),
                }
            })
            .collect())
    }

    fn acquire(
        &self,
        facing: FacingMode,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn VideoStream>> {
        let devices = self.list_devices()?;
        let index = resolve_facing(&devices, facing, self.configured(facing)).ok_or_else(|| {
            StudioError::DeviceUnavailable(format!(
                "no {} camera among {} device(s)",
                facing.label(),
                devices.len()
            ))
        })?;

        let stream = NokhwaStream::open(index, constraints)?;
        Ok(Box::new(stream))
    }
}

/// nokhwa 视频流
pub struct NokhwaStream {
    camera: Camera,
    name: String,
    resolution: Resolution,
    frame_rate: u32,
    max_frame_rate: u32,
    last_read: Option<Instant>,
    stopped: bool,
}

impl NokhwaStream {
    pub fn open(index: u32, constraints: &CaptureConstraints) -> Result<Self> {
        let format = CameraFormat::new_from(
            constraints.ideal_width,
            constraints.ideal_height,
            FrameFormat::MJPEG,
            constraints.ideal_frame_rate,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let mut camera = Camera::new(CameraIndex::Index(index), requested)
            .map_err(|e| StudioError::DeviceUnavailable(format!("camera {}: {}", index, e)))?;
        camera
            .open_stream()
            .map_err(|e| StudioError::DeviceUnavailable(format!("open stream {}: {}", index, e)))?;

        let negotiated = camera.resolution();
        let resolution = Resolution::new(negotiated.width(), negotiated.height());
        let frame_rate = camera.frame_rate();
        let name = camera.info().human_name();
        tracing::info!(
            "📷 打开摄像头 #{} {} ({} @ {}fps)",
            index,
            name,
            resolution,
            frame_rate
        );

        Ok(Self {
            camera,
            name,
            resolution,
            frame_rate,
            max_frame_rate: constraints.max_frame_rate,
            last_read: None,
            stopped: false,
        })
    }

    /// 设备帧率高于上限时节流
    fn throttle(&mut self) {
        if self.max_frame_rate == 0 {
            return;
        }
        let min_interval = Duration::from_secs_f64(1.0 / self.max_frame_rate as f64);
        if let Some(last) = self.last_read {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                std::thread::sleep(min_interval - elapsed);
            }
        }
        self.last_read = Some(Instant::now());
    }
}

impl VideoStream for NokhwaStream {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    fn read_frame(&mut self) -> Result<RgbImage> {
        if self.stopped {
            return Err(StudioError::DeviceUnavailable("stream stopped".into()));
        }
        self.throttle();

        let buffer = self
            .camera
            .frame()
            .map_err(|e| StudioError::InferenceTick(format!("camera frame: {}", e)))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| StudioError::InferenceTick(format!("decode frame: {}", e)))?;

        let (width, height) = decoded.dimensions();
        RgbImage::from_raw(width, height, decoded.into_raw())
            .ok_or_else(|| StudioError::InferenceTick("frame buffer size mismatch".into()))
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("⚠️ 关闭摄像头流失败: {}", e);
        }
    }
}

impl Drop for NokhwaStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(index: u32, name: &str) -> CameraDevice {
        CameraDevice {
            index,
            name: name.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_resolve_by_name() {
        let devices = vec![device(0, "Rear Camera"), device(1, "Front Camera")];
        assert_eq!(resolve_facing(&devices, FacingMode::Front, None), Some(1));
        assert_eq!(resolve_facing(&devices, FacingMode::Back, None), Some(0));
    }

    #[test]
    fn test_resolve_by_position() {
        let devices = vec![device(0, "USB Video"), device(2, "HD Webcam")];
        assert_eq!(resolve_facing(&devices, FacingMode::Front, None), Some(0));
        assert_eq!(resolve_facing(&devices, FacingMode::Back, None), Some(2));

        let single = vec![device(0, "USB Video")];
        assert_eq!(resolve_facing(&single, FacingMode::Back, None), None);
        assert_eq!(resolve_facing(&[], FacingMode::Front, None), None);
    }

    #[test]
    fn test_configured_index_wins() {
        let devices = vec![device(0, "Front Camera"), device(4, "Capture Card")];
        assert_eq!(resolve_facing(&devices, FacingMode::Front, Some(4)), Some(4));
        // 配置的索引不存在
        assert_eq!(resolve_facing(&devices, FacingMode::Front, Some(9)), None);
    }
}
