// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// BlazePose 关键点模型
// 包含: ROI 跟踪、预处理、推理、解码

use anyhow::{anyhow, Result};
use image::RgbImage;
use ndarray::{Array, IxDyn};

use super::ort_backend::OrtBackend;
use super::preprocess::{letterbox, to_tensor, Letterbox, Region};
use super::InferenceOptions;
use crate::pose::{Landmark, Skeleton, LANDMARK_COUNT};

/// 每个关键点 5 个值: x, y, z, visibility(logit), presence(logit)
const VALUES_PER_LANDMARK: usize = 5;

/// 33 个身体点之后的两个辅助点: 髋部中心与全身外接圆上的一点
const AUX_CENTER: usize = 33;
const AUX_SCALE: usize = 34;

/// ROI 相对外接圆直径的放大倍数
const ROI_SCALE: f32 = 1.25;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// 模型内部已经做过 sigmoid 的分数直接使用
fn to_probability(score: f32) -> f32 {
    if (0.0..=1.0).contains(&score) {
        score
    } else {
        sigmoid(score)
    }
}

/// 单帧解码结果
#[derive(Debug, Clone, PartialEq)]
pub struct BlazePoseDecoded {
    pub skeleton: Skeleton,
    pub pose_score: f32,
    /// 下一帧的跟踪区域 (帧像素坐标)
    pub next_roi: Option<Region>,
}

/// 从输出集合中找出关键点张量与姿态存在分数
///
/// 关键点张量长度为 5 的倍数且至少 33 个点; 存在分数是唯一的单元素输出
pub fn split_outputs(ys: &[Array<f32, IxDyn>]) -> Result<(&[f32], f32)> {
    let landmarks = ys
        .iter()
        .filter_map(|y| y.as_slice())
        .find(|s| s.len() >= LANDMARK_COUNT * VALUES_PER_LANDMARK && s.len() % VALUES_PER_LANDMARK == 0)
        .ok_or_else(|| anyhow!("no landmark tensor among {} outputs", ys.len()))?;
    let flag = ys
        .iter()
        .find(|y| y.len() == 1)
        .and_then(|y| y.iter().next().copied())
        .ok_or_else(|| anyhow!("no pose presence output"))?;
    Ok((landmarks, flag))
}

/// 解码关键点张量 (坐标单位为模型输入像素)
pub fn decode(
    landmarks: &[f32],
    flag: f32,
    mapping: &Letterbox,
    opts: &InferenceOptions,
) -> Option<BlazePoseDecoded> {
    let pose_score = to_probability(flag);
    if pose_score < opts.min_presence_confidence {
        return None;
    }

    let point = |i: usize| landmarks.get(i * VALUES_PER_LANDMARK..(i + 1) * VALUES_PER_LANDMARK);

    let mut slots = [None; LANDMARK_COUNT];
    for (i, slot) in slots.iter_mut().enumerate() {
        let Some(v) = point(i) else { break };
        let (x, y) = mapping.to_frame(v[0], v[1]);
        let z = mapping.length_to_frame(v[2]) / mapping.frame_width as f32;
        *slot = Some(
            Landmark::new(x, y)
                .with_depth(z)
                .with_visibility(sigmoid(v[3]).min(sigmoid(v[4]))),
        );
    }

    let next_roi = match (point(AUX_CENTER), point(AUX_SCALE)) {
        (Some(c), Some(s)) if pose_score >= opts.min_tracking_confidence => {
            let (cx, cy) = mapping.to_frame(c[0], c[1]);
            let (sx, sy) = mapping.to_frame(s[0], s[1]);
            let (fw, fh) = (mapping.frame_width as f32, mapping.frame_height as f32);
            let (cx, cy, sx, sy) = (cx * fw, cy * fh, sx * fw, sy * fh);
            let radius = ((sx - cx).powi(2) + (sy - cy).powi(2)).sqrt();
            let side = radius * 2.0 * ROI_SCALE;
            Region {
                x: cx - side / 2.0,
                y: cy - side / 2.0,
                width: side,
                height: side,
            }
            .clamp_to(mapping.frame_width, mapping.frame_height)
        }
        _ => None,
    };

    Some(BlazePoseDecoded {
        skeleton: Skeleton::from_slots(slots),
        pose_score,
        next_roi,
    })
}

/// BlazePose 关键点模型 (单人, 带 ROI 跟踪)
pub struct BlazePose {
    engine: OrtBackend,
    roi: Option<Region>,
}

impl BlazePose {
    pub fn new(engine: OrtBackend) -> Self {
        Self { engine, roi: None }
    }

    pub fn run(&mut self, frame: &RgbImage, opts: &InferenceOptions) -> Result<Vec<Skeleton>> {
        let (fw, fh) = frame.dimensions();
        let region = self.roi.unwrap_or_else(|| Region::full(fw, fh));

        let (input, mapping) = letterbox(frame, region, self.engine.width(), self.engine.height())?;
        let xs = to_tensor(&input, self.engine.layout());
        let ys = self.engine.run(xs)?;
        let (landmarks, flag) = split_outputs(&ys)?;

        match decode(landmarks, flag, &mapping, opts) {
            Some(decoded) => {
                self.roi = decoded.next_roi;
                Ok(vec![decoded.skeleton])
            }
            None => {
                // 跟踪丢失, 下一帧回到全图
                self.roi = None;
                Ok(Vec::new())
            }
        }
    }

    pub fn reset_tracking(&mut self) {
        self.roi = None;
    }
}
