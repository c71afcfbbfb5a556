#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceBackend;
use crate::detect::outputs::{OutputTensor, RawOutputs};
use crate::frame::{Frame, RGB_CHANNELS};

/// Tract-based backend for darknet-style ONNX detectors (YOLOv3 and friends).
///
/// Frames are resized (nearest neighbour) to the model input, scaled to [0, 1] and fed as a
/// `1x3xHxW` tensor. Every output is flattened to rows of `5 + classes` values. Box fields stay
/// normalized; decoding against the original frame size happens in post-processing.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_width: u32,
    input_height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "loaded ONNX model {} ({}x{} input)",
            model_path.display(),
            input_width,
            input_height
        );

        Ok(Self {
            model,
            input_width,
            input_height,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.is_empty() {
            return Err(anyhow!("cannot run inference on an empty frame"));
        }
        let pixels = frame.pixels();
        let src_w = frame.width as usize;
        let src_h = frame.height as usize;
        let dst_w = self.input_width as usize;
        let dst_h = self.input_height as usize;

        let input = tract_ndarray::Array4::from_shape_fn((1, 3, dst_h, dst_w), |(_, c, y, x)| {
            let sy = (y * src_h / dst_h).min(src_h - 1);
            let sx = (x * src_w / dst_w).min(src_w - 1);
            let idx = (sy * src_w + sx) * RGB_CHANNELS + c;
            pixels[idx] as f32 / 255.0
        });

        Ok(input.into_tensor())
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame) -> Result<RawOutputs> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        let mut tensors = Vec::with_capacity(outputs.len());
        for output in outputs.iter() {
            let view = output
                .to_array_view::<f32>()
                .context("model output tensor was not f32")?;
            let shape = view.shape();
            let cols = *shape
                .last()
                .ok_or_else(|| anyhow!("model produced a scalar output"))?;
            let rows = if cols == 0 { 0 } else { view.len() / cols };
            let data: Vec<f32> = view.iter().copied().collect();
            tensors.push(OutputTensor::new(rows, cols, data)?);
        }
        Ok(RawOutputs::new(tensors))
    }
}
