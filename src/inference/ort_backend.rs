// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ONNX Runtime 推理后端

use anyhow::{anyhow, Context, Result};
use ndarray::{Array, Array4, IxDyn};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use super::{Delegate, InferenceOptions};

/// 执行器 (Execution Provider)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

impl OrtEP {
    pub fn from_options(opts: &InferenceOptions) -> Self {
        match opts.delegate {
            Delegate::Cpu => OrtEP::CPU,
            Delegate::Cuda => OrtEP::CUDA(opts.device_id),
            Delegate::TensorRt => OrtEP::Trt(opts.device_id),
        }
    }

    /// 按优先级排列的执行器列表, 最后总是回退到 CPU
    fn providers(&self, trt_fp16: bool) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();
        match *self {
            OrtEP::Trt(device_id) => {
                providers.push(
                    TensorRTExecutionProvider::default()
                        .with_device_id(device_id)
                        .with_fp16(trt_fp16)
                        .build(),
                );
                providers.push(
                    CUDAExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                );
            }
            OrtEP::CUDA(device_id) => {
                providers.push(
                    CUDAExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                );
            }
            OrtEP::CPU => {}
        }
        providers.push(CPUExecutionProvider::default().build());
        providers
    }
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: String,
    pub ep: OrtEP,
    pub trt_fp16: bool,
    /// 模型输入为动态尺寸时使用的默认 (height, width)
    pub image_size: (u32, u32),
}

/// 输入张量布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// [N, C, H, W]
    Nchw,
    /// [N, H, W, C]
    Nhwc,
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    input_name: String,
    output_names: Vec<String>,
    layout: TensorLayout,
    height: u32,
    width: u32,
}

impl OrtBackend {
    pub fn build(args: OrtConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers(args.ep.providers(args.trt_fp16))?
            .commit_from_file(&args.f)
            .with_context(|| format!("failed to load model {}", args.f))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| anyhow!("model {} has no inputs", args.f))?;
        let input_name = input.name.clone();
        let dims: Vec<i64> = input
            .input_type
            .tensor_shape()
            .map(|shape| shape.iter().copied().collect())
            .ok_or_else(|| anyhow!("input {} is not a tensor", input_name))?;
        if dims.len() != 4 {
            return Err(anyhow!(
                "expected a 4D image input, got shape {:?}",
                dims
            ));
        }

        // 通道数为 3 的维度决定布局
        let layout = if dims[3] == 3 {
            TensorLayout::Nhwc
        } else {
            TensorLayout::Nchw
        };
        let (h, w) = match layout {
            TensorLayout::Nhwc => (dims[1], dims[2]),
            TensorLayout::Nchw => (dims[2], dims[3]),
        };
        let height = if h > 0 { h as u32 } else { args.image_size.0 };
        let width = if w > 0 { w as u32 } else { args.image_size.1 };

        let output_names = session.outputs.iter().map(|o| o.name.clone()).collect();

        Ok(Self {
            session,
            ep: args.ep,
            input_name,
            output_names,
            layout,
            height,
            width,
        })
    }

    /// 执行推理, 按模型声明顺序返回所有输出
    pub fn run(&mut self, xs: Array4<f32>) -> Result<Vec<Array<f32, IxDyn>>> {
        let input = Tensor::from_array(xs)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])?;

        let mut ys = Vec::with_capacity(self.output_names.len());
        for name in self.output_names.iter() {
            let y = outputs[name.as_str()]
                .try_extract_array::<f32>()
                .with_context(|| format!("failed to extract output {}", name))?;
            ys.push(y.into_owned());
        }
        Ok(ys)
    }

    pub fn ep(&self) -> &OrtEP {
        &self.ep
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }
}
