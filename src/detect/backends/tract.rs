#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionCapability, DetectorBackend, ModelParams};
use crate::detect::result::{BoundingBox, Detection};

/// Tract-based backend for ONNX object detection.
///
/// Loads a local model file and decodes its output into labeled boxes. The
/// expected output layout is `[1, N, 6]` rows of
/// `(x0, y0, x1, y1, score, class)` with normalized 0..1 corner
/// coordinates, the common layout of exported SSD-style detectors.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    width: u32,
    height: u32,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    ///
    /// `labels` maps class indices to display labels; unknown indices fall
    /// back to `"class<N>"`.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        labels: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            labels,
        })
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        if width != self.width || height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                width,
                height,
                self.width,
                self.height
            ));
        }

        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;

        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let width = width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn label_for(&self, class_index: usize) -> String {
        self.labels
            .get(class_index)
            .cloned()
            .unwrap_or_else(|| format!("class{}", class_index))
    }

    fn decode_rows(&self, outputs: TVec<TValue>, frame_w: f32, frame_h: f32) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let rows = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let flat: Vec<f32> = rows.iter().cloned().collect();
        if flat.len() % 6 != 0 {
            return Err(anyhow!(
                "model output length {} is not a multiple of 6",
                flat.len()
            ));
        }

        let mut detections = Vec::new();
        for row in flat.chunks_exact(6) {
            let [x0, y0, x1, y1, score, class] = [row[0], row[1], row[2], row[3], row[4], row[5]];
            if !score.is_finite() || score <= 0.0 {
                continue;
            }
            if x1 <= x0 || y1 <= y0 {
                continue;
            }
            let bbox = BoundingBox::new(
                x0 * frame_w,
                y0 * frame_h,
                (x1 - x0) * frame_w,
                (y1 - y0) * frame_h,
            );
            let label = self.label_for(class.max(0.0) as usize);
            detections.push(Detection::new(label, score.clamp(0.0, 1.0), bbox));
        }
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ObjectDetection)
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        params: &ModelParams,
    ) -> Result<Vec<Detection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let detections = self.decode_rows(outputs, width as f32, height as f32)?;
        Ok(params.filter(detections))
    }
}
