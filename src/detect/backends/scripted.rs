use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::{DigitDetector, InferenceOracle, NoiseClassifier};
use crate::detect::result::{DigitBox, PlateClass};

/// One scripted answer, consumed per candidate.
#[derive(Clone, Debug)]
pub enum ScriptedAnswer {
    /// Stage A says noise.
    Noise,
    /// Stage A says number; Stage B returns these boxes.
    Digits(Vec<DigitBox>),
    /// Stage A fails with this message.
    Fail(String),
}

impl ScriptedAnswer {
    /// Number answer with one box per class, laid out left to right.
    pub fn classes(classes: &[u8]) -> Self {
        Self::Digits(boxes_for_classes(classes))
    }
}

/// Boxes for `classes` in reading order, 12px apart.
pub fn boxes_for_classes(classes: &[u8]) -> Vec<DigitBox> {
    classes
        .iter()
        .enumerate()
        .map(|(i, &class)| {
            let x1 = 8.0 + 12.0 * i as f32;
            DigitBox::new(x1, 10.0, x1 + 10.0, 38.0, class, 0.9)
        })
        .collect()
}

#[derive(Default)]
struct ScriptState {
    answers: VecDeque<ScriptedAnswer>,
    pending_digits: Option<Vec<DigitBox>>,
}

/// Deterministic oracle for tests and demos: answers come from a queue.
///
/// When the queue runs dry every further candidate is answered with the
/// fallback (noise unless configured otherwise).
#[derive(Clone, Default)]
pub struct ScriptedOracle {
    state: Arc<Mutex<ScriptState>>,
    fallback: Option<Vec<DigitBox>>,
}

impl ScriptedOracle {
    pub fn new(answers: impl IntoIterator<Item = ScriptedAnswer>) -> Self {
        let oracle = Self::default();
        oracle.lock().answers.extend(answers);
        oracle
    }

    /// Answer with `classes` once the script is exhausted.
    pub fn with_fallback_classes(mut self, classes: &[u8]) -> Self {
        self.fallback = Some(boxes_for_classes(classes));
        self
    }

    /// Answers not consumed yet.
    pub fn remaining(&self) -> usize {
        self.lock().answers.len()
    }

    /// Build an oracle sharing this script.
    pub fn oracle(&self) -> InferenceOracle {
        InferenceOracle::new(
            Box::new(ScriptedStage(self.clone())),
            Box::new(ScriptedStage(self.clone())),
        )
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct ScriptedStage(ScriptedOracle);

impl NoiseClassifier for ScriptedStage {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn classify_noise(&mut self, _image: &RgbImage) -> Result<PlateClass> {
        let fallback = self.0.fallback.clone();
        let mut state = self.0.lock();
        let answer = state.answers.pop_front().unwrap_or(match fallback {
            Some(boxes) => ScriptedAnswer::Digits(boxes),
            None => ScriptedAnswer::Noise,
        });
        match answer {
            ScriptedAnswer::Noise => Ok(PlateClass::Noise),
            ScriptedAnswer::Digits(boxes) => {
                state.pending_digits = Some(boxes);
                Ok(PlateClass::Number)
            }
            ScriptedAnswer::Fail(message) => Err(anyhow!(message)),
        }
    }
}

impl DigitDetector for ScriptedStage {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect_digits(&mut self, _image: &RgbImage) -> Result<Vec<DigitBox>> {
        Ok(self.0.lock().pending_digits.take().unwrap_or_default())
    }
}
