#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::config::ModelSettings;
use crate::detect::backend::{DigitDetector, InferenceOracle, NoiseClassifier};
use crate::detect::result::{non_max_suppression, DigitBox, PlateClass};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Load an ONNX model and pin its input shape.
fn load_plan(model_path: &Path, shape: [usize; 4]) -> Result<Plan> {
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(0, f32::fact(shape).into())
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

fn check_size(image: &RgbImage, width: u32, height: u32) -> Result<()> {
    if image.dimensions() != (width, height) {
        return Err(anyhow!(
            "crop size {}x{} does not match model input {}x{}",
            image.width(),
            image.height(),
            width,
            height
        ));
    }
    Ok(())
}

/// Both tract stages, built from `ModelSettings`.
pub struct TractOracle;

impl TractOracle {
    pub fn load(settings: &ModelSettings) -> Result<InferenceOracle> {
        let noise_path = settings
            .noise_model_path
            .as_deref()
            .ok_or_else(|| anyhow!("models.noise_model_path is required for the tract backend"))?;
        let digit_path = settings
            .digit_model_path
            .as_deref()
            .ok_or_else(|| anyhow!("models.digit_model_path is required for the tract backend"))?;
        let noise = TractNoiseClassifier::new(noise_path, settings.tight_size)?;
        let digits = TractDigitDetector::new(
            digit_path,
            settings.context_width,
            settings.context_height,
        )?
        .with_thresholds(settings.confidence_threshold, settings.nms_threshold)
        .with_num_classes(settings.num_classes);
        Ok(InferenceOracle::new(Box::new(noise), Box::new(digits)))
    }
}

/// Stage A over a `1x1xSxS` grayscale input scaled to `0..1`.
///
/// Output is a score per class; class 0 is noise.
pub struct TractNoiseClassifier {
    model: Plan,
    size: u32,
}

impl TractNoiseClassifier {
    pub fn new<P: AsRef<Path>>(model_path: P, size: u32) -> Result<Self> {
        let model = load_plan(model_path.as_ref(), [1, 1, size as usize, size as usize])?;
        Ok(Self { model, size })
    }

    fn build_input(&self, image: &RgbImage) -> Result<Tensor> {
        check_size(image, self.size, self.size)?;
        let gray = image::imageops::grayscale(image);
        let side = self.size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 1, side, side), |(_, _, y, x)| {
            gray.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }
}

impl NoiseClassifier for TractNoiseClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn classify_noise(&mut self, image: &RgbImage) -> Result<PlateClass> {
        let input = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("noise model inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("noise model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("noise model output tensor was not f32")?;
        let best = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx)
            .ok_or_else(|| anyhow!("noise model produced an empty output"))?;
        Ok(if best == 0 {
            PlateClass::Noise
        } else {
            PlateClass::Number
        })
    }
}

/// Stage B: a YOLO-style detector over a `1x3xHxW` RGB input scaled to
/// `0..1`.
///
/// Each output row is `[cx, cy, w, h, objectness, class scores...]` with
/// coordinates relative to the input size.
pub struct TractDigitDetector {
    model: Plan,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    nms_threshold: f32,
    num_classes: usize,
}

impl TractDigitDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model = load_plan(
            model_path.as_ref(),
            [1, 3, height as usize, width as usize],
        )?;
        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            num_classes: 11,
        })
    }

    /// Override the default confidence and NMS thresholds.
    pub fn with_thresholds(mut self, confidence: f32, nms: f32) -> Self {
        self.confidence_threshold = confidence;
        self.nms_threshold = nms;
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Result<Tensor> {
        check_size(image, self.width, self.height)?;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| image.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn decode_rows(&self, outputs: TVec<TValue>) -> Result<Vec<DigitBox>> {
        let (w, h) = (self.width as f32, self.height as f32);
        let mut boxes = Vec::new();
        for output in &outputs {
            let view = output
                .to_array_view::<f32>()
                .context("digit model output tensor was not f32")?;
            let cols = *view
                .shape()
                .last()
                .ok_or_else(|| anyhow!("digit model output has no dimensions"))?;
            if cols < 6 {
                return Err(anyhow!("digit model rows have {} columns, need >= 6", cols));
            }
            let flat: Vec<f32> = view.iter().copied().collect();
            for row in flat.chunks_exact(cols) {
                let scores = &row[5..cols.min(5 + self.num_classes)];
                let Some((class, &score)) = scores
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                else {
                    continue;
                };
                if score <= self.confidence_threshold {
                    continue;
                }
                let (cx, cy, bw, bh) = (row[0] * w, row[1] * h, row[2] * w, row[3] * h);
                if bw <= 0.0 || bh <= 0.0 {
                    continue;
                }
                boxes.push(DigitBox::new(
                    (cx - bw / 2.0).clamp(0.0, w),
                    (cy - bh / 2.0).clamp(0.0, h),
                    (cx + bw / 2.0).clamp(0.0, w),
                    (cy + bh / 2.0).clamp(0.0, h),
                    class as u8,
                    score,
                ));
            }
        }
        Ok(non_max_suppression(&boxes, self.nms_threshold))
    }
}

impl DigitDetector for TractDigitDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect_digits(&mut self, image: &RgbImage) -> Result<Vec<DigitBox>> {
        let input = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("digit model inference failed")?;
        self.decode_rows(outputs)
    }
}
