//! Result aggregation.
//!
//! `StickyLabel` keeps the last accepted label until enough consecutive
//! non-label results arrive; it is not a majority vote. `FpsWindow` is the
//! rolling frame-rate estimate over the last N frame times.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::AggregatorSettings;
use crate::telemetry::ComponentLogger;
use crate::worker::InferenceResult;

/// What a result did to the current label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelUpdate {
    /// A label was accepted; publish it.
    Accepted(String),
    /// The noise streak crossed the threshold and a non-empty label was
    /// cleared.
    Cleared,
    Unchanged,
}

/// Last accepted label with noise-driven expiry.
#[derive(Clone, Debug)]
pub struct StickyLabel {
    current: String,
    noise_streak: u32,
    noise_threshold: u32,
}

impl StickyLabel {
    pub fn new(noise_threshold: u32) -> Self {
        Self {
            current: String::new(),
            noise_streak: 0,
            noise_threshold,
        }
    }

    /// Empty when no label is held.
    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn noise_streak(&self) -> u32 {
        self.noise_streak
    }

    pub fn noise_threshold(&self) -> u32 {
        self.noise_threshold
    }

    pub fn apply(&mut self, result: &InferenceResult) -> LabelUpdate {
        match result {
            InferenceResult::Label(label) => {
                self.current.clone_from(label);
                self.noise_streak = 0;
                LabelUpdate::Accepted(label.clone())
            }
            InferenceResult::Noise | InferenceResult::Unknown => {
                self.noise_streak += 1;
                if self.noise_streak <= self.noise_threshold {
                    return LabelUpdate::Unchanged;
                }
                self.noise_streak = 0;
                if self.current.is_empty() {
                    LabelUpdate::Unchanged
                } else {
                    self.current.clear();
                    LabelUpdate::Cleared
                }
            }
        }
    }
}

/// Fixed-capacity window of per-frame elapsed times.
#[derive(Clone, Debug)]
pub struct FpsWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl FpsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, elapsed: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `len / sum(samples)`; 1 when empty, 0 when no time has elapsed.
    pub fn fps(&self) -> f64 {
        if self.samples.is_empty() {
            return 1.0;
        }
        let total: f64 = self.samples.iter().map(Duration::as_secs_f64).sum();
        if total <= 0.0 {
            0.0
        } else {
            self.samples.len() as f64 / total
        }
    }
}

/// Sticky label plus frame-rate tracking for the extraction loop.
pub struct ResultAggregator {
    label: StickyLabel,
    fps: FpsWindow,
    last_tick: Option<Instant>,
    logger: ComponentLogger,
}

impl ResultAggregator {
    pub fn new(settings: &AggregatorSettings, logger: ComponentLogger) -> Self {
        Self {
            label: StickyLabel::new(settings.noise_threshold),
            fps: FpsWindow::new(settings.fps_window),
            last_tick: None,
            logger,
        }
    }

    /// Fold one worker result into the label state.
    pub fn ingest(&mut self, result: &InferenceResult) -> LabelUpdate {
        let update = self.label.apply(result);
        match &update {
            LabelUpdate::Accepted(label) => {
                self.logger.info(format!("label accepted: {}", label));
            }
            LabelUpdate::Cleared => self.logger.info(format!(
                "label cleared after more than {} non-label results",
                self.label.noise_threshold()
            )),
            LabelUpdate::Unchanged => {}
        }
        update
    }

    /// Record the end of one frame iteration.
    pub fn tick(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_tick.replace(now) {
            self.fps.push(now.duration_since(last));
        }
    }

    pub fn current_label(&self) -> &str {
        self.label.current()
    }

    pub fn noise_streak(&self) -> u32 {
        self.label.noise_streak()
    }

    pub fn fps(&self) -> f64 {
        self.fps.fps()
    }
}
