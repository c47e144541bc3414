// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8-pose 模型
// 输出 [1, 4 + 1 + 17*3, N]: cxcywh + 人体置信度 + 17 个 COCO 关键点 (x, y, conf)

use anyhow::{anyhow, Result};
use image::RgbImage;
use ndarray::{s, Array, Axis, IxDyn};

use super::ort_backend::OrtBackend;
use super::preprocess::{letterbox, to_tensor, Letterbox, Region};
use super::InferenceOptions;
use crate::pose::{Landmark, Skeleton, COCO_TO_POSE};

const CXYWH_OFFSET: usize = 4;
const KPT_STEP: usize = 3;
const NUM_KEYPOINTS: usize = 17;

/// 检测框 (模型输入像素坐标)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            confidence,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection_area(another) / union
    }
}

/// 一个候选: 检测框 + 17 个关键点 (x, y, conf)
pub type Candidate = (Bbox, Vec<(f32, f32, f32)>);

/// 非极大值抑制: 按置信度降序保留互不重叠的候选
pub fn non_max_suppression(xs: &mut Vec<Candidate>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.0.confidence().total_cmp(&b1.0.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].0.iou(&xs[index].0);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 解码原始输出 [1, 56, N]
pub fn decode(
    preds: &Array<f32, IxDyn>,
    mapping: &Letterbox,
    opts: &InferenceOptions,
) -> Result<Vec<Skeleton>> {
    let shape = preds.shape();
    let expected = CXYWH_OFFSET + 1 + KPT_STEP * NUM_KEYPOINTS;
    if shape.len() != 3 || shape[1] != expected {
        return Err(anyhow!(
            "unexpected pose output shape {:?}, expected [1, {}, N]",
            shape,
            expected
        ));
    }

    let anchor = preds.index_axis(Axis(0), 0);
    let mut data: Vec<Candidate> = Vec::new();
    for pred in anchor.axis_iter(Axis(1)) {
        let confidence = pred[CXYWH_OFFSET];
        if confidence < opts.min_detection_confidence {
            continue;
        }

        let bbox = pred.slice(s![0..CXYWH_OFFSET]);
        let (cx, cy, w, h) = (bbox[0], bbox[1], bbox[2], bbox[3]);
        let kpts = pred.slice(s![CXYWH_OFFSET + 1..]);
        let keypoints = (0..NUM_KEYPOINTS)
            .map(|i| {
                (
                    kpts[KPT_STEP * i],
                    kpts[KPT_STEP * i + 1],
                    kpts[KPT_STEP * i + 2],
                )
            })
            .collect();

        data.push((
            Bbox::new(cx - w / 2.0, cy - h / 2.0, w, h, confidence),
            keypoints,
        ));
    }

    non_max_suppression(&mut data, opts.iou_threshold);
    data.truncate(opts.num_poses);

    Ok(data
        .into_iter()
        .map(|(_, keypoints)| {
            let mut skeleton = Skeleton::empty();
            for (id, (kx, ky, kconf)) in COCO_TO_POSE.iter().zip(keypoints) {
                if kconf < opts.min_presence_confidence {
                    continue;
                }
                let (x, y) = mapping.to_frame(kx, ky);
                skeleton = skeleton.with(
                    *id,
                    Landmark::new(x.clamp(0.0, 1.0), y.clamp(0.0, 1.0)).with_visibility(kconf),
                );
            }
            skeleton
        })
        .filter(|s| s.detected_count() > 0)
        .collect())
}

/// YOLOv8-pose 多人模型
pub struct YoloPose {
    engine: OrtBackend,
}

impl YoloPose {
    pub fn new(engine: OrtBackend) -> Self {
        Self { engine }
    }

    pub fn run(&mut self, frame: &RgbImage, opts: &InferenceOptions) -> Result<Vec<Skeleton>> {
        let (fw, fh) = frame.dimensions();
        let (input, mapping) = letterbox(
            frame,
            Region::full(fw, fh),
            self.engine.width(),
            self.engine.height(),
        )?;
        let xs = to_tensor(&input, self.engine.layout());
        let ys = self.engine.run(xs)?;
        let preds = ys.first().ok_or_else(|| anyhow!("model produced no outputs"))?;
        decode(preds, &mapping, opts)
    }
}
