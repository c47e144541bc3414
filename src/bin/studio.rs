// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 实时姿态工作室 - 窗口驱动
//!
//! cargo run --bin studio --release -- --model models/pose_landmark_full.onnx

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use egui_macroquad::egui;
use macroquad::prelude::*;

use motion_studio::capture::{CameraBackend, NokhwaBackend};
use motion_studio::inference::{BoxedLandmarker, ModelLoader, OrtPoseLandmarker};
use motion_studio::overlay::Surface;
use motion_studio::pipeline::PipelineStatus;
use motion_studio::scheduler::TickOutcome;
use motion_studio::{Args, PipelineState, PosePipeline, StudioConfig};

fn window_conf() -> Conf {
    Conf {
        window_title: "Motion Studio".to_owned(),
        window_width: 1280,
        window_height: 720,
        high_dpi: true,
        ..Default::default()
    }
}

/// 界面动作 (在 egui 回调里收集, 回调结束后执行)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Toggle,
    SwitchFacing,
    Quit,
}

/// 叠加层纹理: 尺寸变化时重建, 否则只更新像素
#[derive(Default)]
struct OverlayTexture {
    texture: Option<Texture2D>,
}

impl OverlayTexture {
    fn upload(&mut self, surface: &Surface) {
        let (width, height) = surface.dimensions();
        let needs_rebuild = match &self.texture {
            Some(tex) => tex.width() != width as f32 || tex.height() != height as f32,
            None => true,
        };

        if needs_rebuild {
            let texture = Texture2D::from_rgba8(width as u16, height as u16, surface.as_bytes());
            texture.set_filter(FilterMode::Linear);
            self.texture = Some(texture);
        } else if let Some(tex) = &self.texture {
            let img = Image {
                bytes: surface.as_bytes().to_vec(),
                width: width as u16,
                height: height as u16,
            };
            tex.update(&img);
        }
    }

    fn clear(&mut self) {
        self.texture = None;
    }

    /// 保持宽高比居中绘制
    fn draw(&self) {
        let Some(texture) = &self.texture else {
            return;
        };
        let scale = (screen_width() / texture.width()).min(screen_height() / texture.height());
        let scaled_width = texture.width() * scale;
        let scaled_height = texture.height() * scale;
        draw_texture_ex(
            texture,
            (screen_width() - scaled_width) / 2.0,
            (screen_height() - scaled_height) / 2.0,
            WHITE,
            DrawTextureParams {
                dest_size: Some(vec2(scaled_width, scaled_height)),
                ..Default::default()
            },
        );
    }
}

fn control_panel(ui: &mut egui::Ui, status: &PipelineStatus, actions: &mut Vec<Action>) {
    egui::CollapsingHeader::new("📊 系统状态")
        .default_open(true)
        .show(ui, |ui| {
            ui.horizontal(|ui| {
                ui.label("状态:");
                let color = match &status.state {
                    PipelineState::Running { .. } => egui::Color32::GREEN,
                    PipelineState::Error(_) => egui::Color32::RED,
                    PipelineState::Initializing => egui::Color32::YELLOW,
                    _ => egui::Color32::LIGHT_GRAY,
                };
                ui.colored_label(color, status.state.name());
                if status.is_loading() {
                    ui.spinner();
                }
            });
            if let Some(fault) = status.error() {
                ui.colored_label(egui::Color32::RED, fault.message.as_str());
            }
            if let Some(resolution) = status.resolution {
                ui.label(format!("分辨率: {}", resolution));
            }
            ui.label(format!(
                "推理 {} | 跳过 {} | 失败 {}",
                status.stats.inferences, status.stats.skipped, status.stats.failed
            ));
        });

    ui.separator();

    ui.horizontal(|ui| {
        let label = if status.is_running() {
            "⏹ 停止"
        } else {
            "▶ 开始"
        };
        if ui
            .add_enabled(status.can_toggle(), egui::Button::new(label))
            .clicked()
        {
            actions.push(Action::Toggle);
        }
        let facing = format!("🔄 摄像头: {}", status.facing.label());
        if ui
            .add_enabled(!status.is_loading(), egui::Button::new(facing))
            .clicked()
        {
            actions.push(Action::SwitchFacing);
        }
    });

    ui.separator();

    egui::CollapsingHeader::new("📐 关节角度")
        .default_open(true)
        .show(ui, |ui| {
            egui::Grid::new("joint_angles")
                .num_columns(2)
                .striped(true)
                .show(ui, |ui| {
                    for (key, value) in status.angles.iter() {
                        ui.label(key.label());
                        match value {
                            Some(degrees) => ui.label(format!("{:.0}°", degrees)),
                            None => ui.colored_label(egui::Color32::GRAY, "--"),
                        };
                        ui.end_row();
                    }
                });
        });
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = StudioConfig::load(&args.config);
    config.apply_args(&args);
    config.validate()?;
    config.print_summary();

    let backend = Arc::new(NokhwaBackend::new(
        config.capture.front_device,
        config.capture.back_device,
    ));

    if args.list {
        let devices = backend.list_devices()?;
        tracing::info!("📹 找到 {} 个摄像头", devices.len());
        for device in devices {
            tracing::info!("  [{}] {} ({})", device.index, device.name, device.description);
        }
        return Ok(());
    }

    let mut pipeline = PosePipeline::new(backend, &config)?;

    let model_path = args.model.clone();
    let options = config.inference.clone();
    let profile = args.profile;
    let loader = ModelLoader::spawn(move || {
        let mut landmarker = OrtPoseLandmarker::initialize(&model_path, options)?;
        landmarker.set_profile(profile);
        Ok(Box::new(landmarker) as BoxedLandmarker)
    })?;
    pipeline.initialize(loader)?;

    let mut texture = OverlayTexture::default();
    loop {
        match pipeline.on_refresh(Instant::now()) {
            TickOutcome::Processed(_) => texture.upload(pipeline.surface()),
            TickOutcome::Invalidated => texture.clear(),
            _ => {}
        }
        let status = pipeline.status();

        clear_background(BLACK);
        if status.is_running() {
            texture.draw();
        }

        let mut actions = Vec::new();
        egui_macroquad::ui(|egui_ctx| {
            egui::Window::new("控制面板")
                .default_pos(egui::pos2(10.0, 10.0))
                .default_size(egui::vec2(260.0, 380.0))
                .resizable(true)
                .show(egui_ctx, |ui| control_panel(ui, &status, &mut actions));
        });
        egui_macroquad::draw();

        if is_key_pressed(KeyCode::Space) && status.can_toggle() {
            actions.push(Action::Toggle);
        }
        if is_key_pressed(KeyCode::F) && !status.is_loading() {
            actions.push(Action::SwitchFacing);
        }
        if is_key_pressed(KeyCode::Escape) {
            actions.push(Action::Quit);
        }

        let mut quit = false;
        for action in actions {
            let result = match action {
                Action::Toggle => pipeline.toggle(),
                Action::SwitchFacing => pipeline.switch_facing(),
                Action::Quit => {
                    quit = true;
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::warn!("⚠️ {:?} 失败: {}", action, e);
            }
        }
        if !pipeline.status().is_running() {
            texture.clear();
        }
        if quit {
            break;
        }

        next_frame().await;
    }

    pipeline.shutdown();
    Ok(())
}

#[macroquad::main(window_conf)]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}
