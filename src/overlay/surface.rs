// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 绘制表面: RGBA 像素缓冲 + 可保存/恢复的绘制状态

use std::ops::{Deref, DerefMut};

use image::imageops::FilterType;
use image::{GenericImage, GenericImageView, Rgba, RgbaImage, RgbImage, SubImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;

/// 裁剪矩形 (像素)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ClipRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 两个矩形的交集, 不相交时宽高为 0
    pub fn intersect(&self, other: &ClipRect) -> ClipRect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        ClipRect::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// 绘制状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawStyle {
    pub stroke: Rgba<u8>,
    pub fill: Rgba<u8>,
    pub line_width: f32,
    pub clip: Option<ClipRect>,
}

impl Default for DrawStyle {
    fn default() -> Self {
        Self {
            stroke: Rgba([0, 0, 0, 255]),
            fill: Rgba([0, 0, 0, 255]),
            line_width: 1.0,
            clip: None,
        }
    }
}

pub struct Surface {
    image: RgbaImage,
    style: DrawStyle,
    stack: Vec<DrawStyle>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            style: DrawStyle::default(),
            stack: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// RGBA 字节 (用于上传纹理)
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// 重新分配缓冲, 绘制状态同时复位
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.dimensions() == (width, height) {
            return;
        }
        self.image = RgbaImage::new(width, height);
        self.style = DrawStyle::default();
        self.stack.clear();
    }

    // ---- 状态 ----

    pub fn style(&self) -> &DrawStyle {
        &self.style
    }

    pub fn set_stroke(&mut self, color: Rgba<u8>) {
        self.style.stroke = color;
    }

    pub fn set_fill(&mut self, color: Rgba<u8>) {
        self.style.fill = color;
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.style.line_width = width.max(0.0);
    }

    /// 与当前裁剪区域求交
    pub fn clip(&mut self, rect: ClipRect) {
        let current = self.effective_clip();
        self.style.clip = Some(current.intersect(&rect));
    }

    pub fn save(&mut self) {
        self.stack.push(self.style);
    }

    /// 恢复到最近一次 save; 栈为空时返回 false
    pub fn restore(&mut self) -> bool {
        match self.stack.pop() {
            Some(style) => {
                self.style = style;
                true
            }
            None => false,
        }
    }

    pub fn save_depth(&self) -> usize {
        self.stack.len()
    }

    /// save 并返回守卫, 守卫释放时自动 restore
    pub fn scoped(&mut self) -> SurfaceGuard<'_> {
        self.save();
        let depth = self.stack.len();
        SurfaceGuard {
            surface: self,
            depth,
        }
    }

    fn effective_clip(&self) -> ClipRect {
        let full = ClipRect::new(0, 0, self.width(), self.height());
        match self.style.clip {
            Some(clip) => full.intersect(&clip),
            None => full,
        }
    }

    /// 在裁剪区域上绘制, 回调收到区域视图与区域原点
    fn paint<F>(&mut self, f: F)
    where
        F: FnOnce(&mut SubImage<&mut RgbaImage>, f32, f32),
    {
        let clip = self.effective_clip();
        if clip.is_empty() {
            return;
        }
        let mut view = image::imageops::crop(&mut self.image, clip.x, clip.y, clip.width, clip.height);
        f(&mut view, clip.x as f32, clip.y as f32);
    }

    // ---- 绘制 ----

    /// 用颜色填充裁剪区域
    pub fn clear(&mut self, color: Rgba<u8>) {
        self.paint(|view, _, _| {
            let (w, h) = view.dimensions();
            for y in 0..h {
                for x in 0..w {
                    view.put_pixel(x, y, color);
                }
            }
        });
    }

    /// 铺满整个表面绘制一帧 (尺寸不同则缩放)
    pub fn draw_image(&mut self, frame: &RgbImage) {
        let (w, h) = self.dimensions();
        let scaled;
        let source = if frame.dimensions() == (w, h) {
            frame
        } else {
            scaled = image::imageops::resize(frame, w, h, FilterType::Triangle);
            &scaled
        };

        self.paint(|view, ox, oy| {
            let (vw, vh) = view.dimensions();
            let (ox, oy) = (ox as u32, oy as u32);
            for y in 0..vh {
                for x in 0..vw {
                    let [r, g, b] = source.get_pixel(x + ox, y + oy).0;
                    view.put_pixel(x, y, Rgba([r, g, b, 255]));
                }
            }
        });
    }

    /// 描边线段 (当前线宽, 圆头)
    pub fn stroke_line(&mut self, x0: f32, y0: f32, x1: f32, y1: f32) {
        let color = self.style.stroke;
        let half = self.style.line_width / 2.0;
        if half <= 0.0 {
            return;
        }

        self.paint(|view, ox, oy| {
            let (x0, y0, x1, y1) = (x0 - ox, y0 - oy, x1 - ox, y1 - oy);
            let (dx, dy) = (x1 - x0, y1 - y0);
            let len = (dx * dx + dy * dy).sqrt();

            if half < 1.0 || len < 1.0 {
                draw_line_segment_mut(&mut **view, (x0, y0), (x1, y1), color);
            } else {
                let (nx, ny) = (-dy / len * half, dx / len * half);
                let corners = [
                    (x0 + nx, y0 + ny),
                    (x1 + nx, y1 + ny),
                    (x1 - nx, y1 - ny),
                    (x0 - nx, y0 - ny),
                ];
                let mut poly: Vec<Point<i32>> = Vec::with_capacity(4);
                for (x, y) in corners {
                    let p = Point::new(x.round() as i32, y.round() as i32);
                    if poly.last() != Some(&p) {
                        poly.push(p);
                    }
                }
                // 首尾相同的多边形会让 imageproc panic
                while poly.len() > 1 && poly.first() == poly.last() {
                    poly.pop();
                }
                if poly.len() >= 3 {
                    draw_polygon_mut(&mut **view, &poly, color);
                } else {
                    draw_line_segment_mut(&mut **view, (x0, y0), (x1, y1), color);
                }
            }

            let r = half.round() as i32;
            if r >= 1 {
                for (x, y) in [(x0, y0), (x1, y1)] {
                    draw_filled_circle_mut(&mut **view, (x.round() as i32, y.round() as i32), r, color);
                }
            }
        });
    }

    /// 实心圆 + 描边 (描边宽度为当前线宽, 以半径为中线)
    pub fn draw_marker(&mut self, cx: f32, cy: f32, radius: f32) {
        let DrawStyle {
            stroke,
            fill,
            line_width,
            ..
        } = self.style;

        self.paint(|view, ox, oy| {
            let center = ((cx - ox).round() as i32, (cy - oy).round() as i32);
            let half = line_width / 2.0;
            if half > 0.0 {
                let outer = (radius + half).round() as i32;
                draw_filled_circle_mut(&mut **view, center, outer.max(0), stroke);
            }
            let inner = (radius - half).round() as i32;
            if inner >= 0 {
                draw_filled_circle_mut(&mut **view, center, inner, fill);
            }
        });
    }
}

/// 作用域守卫: 释放时恢复到进入时的绘制状态
pub struct SurfaceGuard<'a> {
    surface: &'a mut Surface,
    depth: usize,
}

impl Deref for SurfaceGuard<'_> {
    type Target = Surface;

    fn deref(&self) -> &Surface {
        self.surface
    }
}

impl DerefMut for SurfaceGuard<'_> {
    fn deref_mut(&mut self) -> &mut Surface {
        self.surface
    }
}

impl Drop for SurfaceGuard<'_> {
    fn drop(&mut self) {
        // 守卫内部未配对的 save 一并弹出
        while self.surface.save_depth() >= self.depth {
            if !self.surface.restore() {
                break;
            }
        }
    }
}
