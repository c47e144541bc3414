// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 预处理: 裁剪 → 等比缩放 + 灰边填充 (letterbox) → 张量

use anyhow::{anyhow, Result};
use fast_image_resize as fr;
use image::RgbImage;
use ndarray::Array4;

use super::ort_backend::TensorLayout;

/// 灰边填充值 (与 YOLO 训练时一致)
const PAD_VALUE: u8 = 144;

/// 帧内的像素区域
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }

    /// 裁剪到帧范围内, 区域退化时返回 None
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let x0 = self.x.max(0.0);
        let y0 = self.y.max(0.0);
        let x1 = (self.x + self.width).min(width as f32);
        let y1 = (self.y + self.height).min(height as f32);
        if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
            return None;
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

/// 模型输入坐标 ↔ 原始帧坐标 的映射
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub region: Region,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Letterbox {
    /// 计算映射 (不做实际缩放)
    pub fn fit(region: Region, frame_width: u32, frame_height: u32, dst_w: u32, dst_h: u32) -> Self {
        let scale = (dst_w as f32 / region.width).min(dst_h as f32 / region.height);
        let new_w = (region.width * scale).round();
        let new_h = (region.height * scale).round();
        Self {
            scale,
            pad_x: ((dst_w as f32 - new_w) / 2.0).floor(),
            pad_y: ((dst_h as f32 - new_h) / 2.0).floor(),
            region,
            frame_width,
            frame_height,
        }
    }

    /// 模型输入像素 → 相对帧尺寸的归一化坐标
    pub fn to_frame(&self, mx: f32, my: f32) -> (f32, f32) {
        let px = (mx - self.pad_x) / self.scale + self.region.x;
        let py = (my - self.pad_y) / self.scale + self.region.y;
        (px / self.frame_width as f32, py / self.frame_height as f32)
    }

    /// 模型输入尺度上的长度 → 帧像素长度
    pub fn length_to_frame(&self, value: f32) -> f32 {
        value / self.scale
    }
}

/// 裁剪区域并 letterbox 到 (dst_w, dst_h)
pub fn letterbox(
    frame: &RgbImage,
    region: Region,
    dst_w: u32,
    dst_h: u32,
) -> Result<(RgbImage, Letterbox)> {
    let (fw, fh) = frame.dimensions();
    let region = region
        .clamp_to(fw, fh)
        .ok_or_else(|| anyhow!("region {:?} is outside the {}x{} frame", region, fw, fh))?;
    let mapping = Letterbox::fit(region, fw, fh, dst_w, dst_h);

    let crop = image::imageops::crop_imm(
        frame,
        region.x as u32,
        region.y as u32,
        region.width as u32,
        region.height as u32,
    )
    .to_image();

    let new_w = ((region.width * mapping.scale).round() as u32).clamp(1, dst_w);
    let new_h = ((region.height * mapping.scale).round() as u32).clamp(1, dst_h);

    let (cw, ch) = crop.dimensions();
    let src_image = fr::images::Image::from_vec_u8(cw, ch, crop.into_raw(), fr::PixelType::U8x3)
        .map_err(|e| anyhow!("resize source: {:?}", e))?;
    let mut dst_image = fr::images::Image::new(new_w, new_h, fr::PixelType::U8x3);
    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )
        .map_err(|e| anyhow!("resize: {:?}", e))?;

    let resized = RgbImage::from_raw(new_w, new_h, dst_image.into_vec())
        .ok_or_else(|| anyhow!("resized buffer size mismatch"))?;

    let mut canvas = RgbImage::from_pixel(dst_w, dst_h, image::Rgb([PAD_VALUE; 3]));
    image::imageops::replace(
        &mut canvas,
        &resized,
        mapping.pad_x as i64,
        mapping.pad_y as i64,
    );

    Ok((canvas, mapping))
}

/// RGB 图像 → [1, C, H, W] 或 [1, H, W, C], 归一化到 [0, 1]
pub fn to_tensor(image: &RgbImage, layout: TensorLayout) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut xs = match layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, h, w)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, 3)),
    };
    for (x, y, rgb) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = rgb.0[c] as f32 / 255.0;
            match layout {
                TensorLayout::Nchw => xs[[0, c, y, x]] = v,
                TensorLayout::Nhwc => xs[[0, y, x, c]] = v,
            }
        }
    }
    xs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_wide_frame() {
        // 640x480 → 256x256: scale 0.4, 高度 192, 上下各 32
        let lb = Letterbox::fit(Region::full(640, 480), 640, 480, 256, 256);
        assert!((lb.scale - 0.4).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 32.0);

        let (x, y) = lb.to_frame(128.0, 128.0);
        assert!((x - 0.5).abs() < 1e-4 && (y - 0.5).abs() < 1e-4);
        let (x, y) = lb.to_frame(0.0, 32.0);
        assert!(x.abs() < 1e-4 && y.abs() < 1e-4);
    }

    #[test]
    fn test_fit_with_region() {
        let region = Region {
            x: 100.0,
            y: 50.0,
            width: 200.0,
            height: 200.0,
        };
        let lb = Letterbox::fit(region, 400, 300, 100, 100);
        let (x, y) = lb.to_frame(50.0, 50.0);
        assert!((x - 200.0 / 400.0).abs() < 1e-4);
        assert!((y - 150.0 / 300.0).abs() < 1e-4);
        assert!((lb.length_to_frame(10.0) - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_region_clamp() {
        let region = Region {
            x: -10.0,
            y: -10.0,
            width: 50.0,
            height: 50.0,
        };
        let clamped = region.clamp_to(30, 30).unwrap();
        assert_eq!((clamped.x, clamped.y, clamped.width, clamped.height), (0.0, 0.0, 30.0, 30.0));

        let outside = Region {
            x: 100.0,
            y: 100.0,
            width: 10.0,
            height: 10.0,
        };
        assert!(outside.clamp_to(30, 30).is_none());
    }

    #[test]
    fn test_letterbox_pads_with_gray() {
        let frame = RgbImage::from_pixel(40, 20, image::Rgb([255, 0, 0]));
        let (canvas, lb) = letterbox(&frame, Region::full(40, 20), 32, 32).unwrap();
        assert_eq!(canvas.dimensions(), (32, 32));
        assert_eq!(lb.pad_y, 8.0);
        assert_eq!(canvas.get_pixel(16, 0).0, [PAD_VALUE; 3]);
        assert_eq!(canvas.get_pixel(16, 16).0, [255, 0, 0]);
    }

    #[test]
    fn test_tensor_layouts() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(1, 0, image::Rgb([255, 0, 51]));

        let nchw = to_tensor(&image, TensorLayout::Nchw);
        assert_eq!(nchw.shape(), &[1, 3, 1, 2]);
        assert_eq!(nchw[[0, 0, 0, 1]], 1.0);
        assert!((nchw[[0, 2, 0, 1]] - 0.2).abs() < 1e-6);

        let nhwc = to_tensor(&image, TensorLayout::Nhwc);
        assert_eq!(nhwc.shape(), &[1, 1, 2, 3]);
        assert_eq!(nhwc[[0, 0, 1, 0]], 1.0);
    }
}
