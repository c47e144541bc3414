// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 叠加层渲染: 视频帧 + 骨架连线 + 关键点标记

use image::{Rgba, RgbImage};

use super::surface::Surface;
use crate::config::OverlayConfig;
use crate::error::{Result, StudioError};
use crate::pose::{Landmark, PoseLandmarkId, Skeleton, POSE_CONNECTIONS};

/// 解析 `#RRGGBB` 颜色
pub fn parse_hex_color(value: &str) -> Result<Rgba<u8>> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(StudioError::Config(format!(
            "invalid color {:?}, expected #RRGGBB",
            value
        )));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|e| StudioError::Config(format!("invalid color {:?}: {}", value, e)))
    };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, 255]))
}

/// 解析后的绘制样式
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub connector_color: Rgba<u8>,
    pub connector_width: f32,
    pub marker_stroke: Rgba<u8>,
    pub marker_fill: Rgba<u8>,
    pub marker_stroke_width: f32,
    pub marker_radius: f32,
    pub min_visibility: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            connector_color: Rgba([255, 255, 255, 255]),
            connector_width: 5.0,
            marker_stroke: Rgba([255, 255, 255, 255]),
            marker_fill: Rgba([0, 0, 0, 255]),
            marker_stroke_width: 3.0,
            marker_radius: 10.0,
            min_visibility: 0.0,
        }
    }
}

impl OverlayStyle {
    pub fn from_config(config: &OverlayConfig) -> Result<Self> {
        Ok(Self {
            connector_color: parse_hex_color(&config.connector_color)?,
            connector_width: config.connector_width.max(0.0),
            marker_stroke: parse_hex_color(&config.marker_stroke_color)?,
            marker_fill: parse_hex_color(&config.marker_fill_color)?,
            marker_stroke_width: config.marker_stroke_width.max(0.0),
            marker_radius: config.marker_radius.max(0.0),
            min_visibility: config.min_visibility,
        })
    }
}

pub struct OverlayRenderer {
    surface: Surface,
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(width: u32, height: u32, style: OverlayStyle) -> Self {
        Self {
            surface: Surface::new(width, height),
            style,
        }
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// 表面尺寸跟随视频原生尺寸
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.surface.dimensions() != (width, height) {
            tracing::debug!("🖼️ 叠加层尺寸 → {}x{}", width, height);
            self.surface.resize(width, height);
        }
    }

    /// 清屏 → 视频帧 → 每个骨架的连线与标记
    ///
    /// 绘制状态在本次调用结束时恢复, 不会带到下一帧
    pub fn render(&mut self, frame: &RgbImage, skeletons: &[Skeleton]) {
        let style = self.style;
        let (w, h) = self.surface.dimensions();
        let mut g = self.surface.scoped();

        g.clear(Rgba([0, 0, 0, 255]));
        g.draw_image(frame);

        for skeleton in skeletons {
            let visible = |id: PoseLandmarkId| -> Option<Landmark> {
                skeleton
                    .get(id)
                    .copied()
                    .filter(|lm| lm.is_visible(style.min_visibility))
            };

            g.set_stroke(style.connector_color);
            g.set_line_width(style.connector_width);
            for (a, b) in POSE_CONNECTIONS {
                let (Some(ida), Some(idb)) = (PoseLandmarkId::from_index(a), PoseLandmarkId::from_index(b)) else {
                    continue;
                };
                if let (Some(pa), Some(pb)) = (visible(ida), visible(idb)) {
                    let (x0, y0) = pa.to_pixel(w, h);
                    let (x1, y1) = pb.to_pixel(w, h);
                    g.stroke_line(x0, y0, x1, y1);
                }
            }

            g.set_stroke(style.marker_stroke);
            g.set_fill(style.marker_fill);
            g.set_line_width(style.marker_stroke_width);
            for id in PoseLandmarkId::ALL {
                if let Some(lm) = visible(id) {
                    let (x, y) = lm.to_pixel(w, h);
                    g.draw_marker(x, y, style.marker_radius);
                }
            }
        }
    }
}
