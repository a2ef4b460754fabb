use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::{DigitDetector, InferenceOracle, NoiseClassifier};
use crate::detect::result::{DigitBox, PlateClass};

/// Model-free Stage A: a crop counts as a number when its luminance
/// standard deviation reaches `contrast_threshold`.
///
/// Printed digits on a plate give strong light/dark contrast; flat wall or
/// door texture does not. Pairs with `NullDigitDetector`, so a heuristic
/// oracle never produces labels, only `Noise` and `Unknown`.
pub struct HeuristicClassifier {
    contrast_threshold: f32,
}

impl HeuristicClassifier {
    pub fn new(contrast_threshold: f32) -> Self {
        Self { contrast_threshold }
    }

    pub fn oracle(contrast_threshold: f32) -> InferenceOracle {
        InferenceOracle::new(
            Box::new(Self::new(contrast_threshold)),
            Box::new(NullDigitDetector),
        )
    }
}

impl NoiseClassifier for HeuristicClassifier {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn classify_noise(&mut self, image: &RgbImage) -> Result<PlateClass> {
        if luminance_stddev(image) >= self.contrast_threshold {
            Ok(PlateClass::Number)
        } else {
            Ok(PlateClass::Noise)
        }
    }
}

/// Stage B that never finds a glyph.
pub struct NullDigitDetector;

impl DigitDetector for NullDigitDetector {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn detect_digits(&mut self, _image: &RgbImage) -> Result<Vec<DigitBox>> {
        Ok(Vec::new())
    }
}

fn luminance_stddev(image: &RgbImage) -> f32 {
    let count = image.pixels().len();
    if count == 0 {
        return 0.0;
    }
    let lumas: Vec<f32> = image
        .pixels()
        .map(|p| 0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32)
        .collect();
    let mean = lumas.iter().sum::<f32>() / count as f32;
    let variance = lumas.iter().map(|l| (l - mean).powi(2)).sum::<f32>() / count as f32;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn flat_crop_is_noise() -> Result<()> {
        let mut classifier = HeuristicClassifier::new(40.0);
        let flat = RgbImage::from_pixel(48, 48, Rgb([120, 120, 120]));
        assert_eq!(classifier.classify_noise(&flat)?, PlateClass::Noise);
        Ok(())
    }

    #[test]
    fn high_contrast_crop_is_number() -> Result<()> {
        let mut classifier = HeuristicClassifier::new(40.0);
        let striped = RgbImage::from_fn(48, 48, |x, _| {
            if (x / 6) % 2 == 0 {
                Rgb([240, 240, 240])
            } else {
                Rgb([20, 20, 20])
            }
        });
        assert_eq!(classifier.classify_noise(&striped)?, PlateClass::Number);
        Ok(())
    }

    #[test]
    fn null_detector_finds_nothing() -> Result<()> {
        assert!(NullDigitDetector
            .detect_digits(&RgbImage::new(96, 48))?
            .is_empty());
        Ok(())
    }
}
