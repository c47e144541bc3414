// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 叠加层渲染 (Overlay Renderer)
///
/// - surface: RGBA 绘制表面, 带 save/restore 状态栈与裁剪
/// - renderer: 每帧把视频帧、骨架连线、关键点标记画到表面上
pub mod renderer;
pub mod surface;

pub use renderer::{parse_hex_color, OverlayRenderer, OverlayStyle};
pub use surface::{ClipRect, DrawStyle, Surface, SurfaceGuard};
