use anyhow::Result;
use image::RgbImage;

use crate::detect::result::{DigitBox, PlateClass};

/// Stage A: decides whether a tight crop shows a door number.
///
/// Implementations are created and used on the worker thread only; they may
/// hold non-thread-safe runtime state.
pub trait NoiseClassifier {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Classify a tight crop.
    fn classify_noise(&mut self, image: &RgbImage) -> Result<PlateClass>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Stage B: finds digit glyphs in a context crop.
pub trait DigitDetector {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect glyphs. Order of the returned boxes is unspecified.
    fn detect_digits(&mut self, image: &RgbImage) -> Result<Vec<DigitBox>>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Both stages behind one port.
pub struct InferenceOracle {
    noise: Box<dyn NoiseClassifier>,
    digits: Box<dyn DigitDetector>,
}

impl InferenceOracle {
    pub fn new(noise: Box<dyn NoiseClassifier>, digits: Box<dyn DigitDetector>) -> Self {
        Self { noise, digits }
    }

    pub fn classify_noise(&mut self, image: &RgbImage) -> Result<PlateClass> {
        self.noise.classify_noise(image)
    }

    pub fn detect_digits(&mut self, image: &RgbImage) -> Result<Vec<DigitBox>> {
        self.digits.detect_digits(image)
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.noise.warm_up()?;
        self.digits.warm_up()
    }

    /// `stage-a/stage-b` backend names, for logs.
    pub fn describe(&self) -> String {
        format!("{}/{}", self.noise.name(), self.digits.name())
    }
}
