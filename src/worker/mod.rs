//! Label worker.
//!
//! A dedicated thread owns the inference oracle. It is reached only through
//! channels:
//!
//! - `candidates` (bounded): extractor → worker. `submit` never blocks; when
//!   the channel is full the newest candidate is dropped.
//! - `results` (unbounded): worker → aggregator, one result per consumed
//!   candidate.
//! - `control` (capacity 1): stop requests.
//! - `ready` (capacity 1): sent once, after the models loaded. If loading
//!   fails the sender is dropped without sending, which `wait_ready` reports
//!   as an explicit failure.

mod archive;
mod label;
mod lifecycle;

pub use archive::CropArchive;
pub use label::{assemble_label, decode_detections, digit_char, label_candidate, InferenceResult};
pub use lifecycle::{Lifecycle, StateView, WorkerState};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::WorkerSettings;
use crate::detect::{InferenceOracle, OracleLoader};
use crate::extract::Candidate;
use crate::telemetry::ComponentLogger;

const JOIN_POLL: Duration = Duration::from_millis(5);

#[derive(Debug)]
enum Control {
    Stop,
}

/// Outcome of `WorkerHandle::submit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Channel full; the candidate was discarded.
    Dropped,
    /// The worker has exited.
    Disconnected,
}

/// Summary returned when the worker thread exits.
#[derive(Clone, Debug, Default)]
pub struct WorkerReport {
    pub final_state: Option<WorkerState>,
    pub processed: u64,
    pub noise: u64,
    pub labels: u64,
    pub unknown: u64,
    /// Candidates whose inference failed (reported as `Unknown`).
    pub errors: u64,
    /// Candidates dropped at submit because the channel was full.
    pub dropped: u64,
    pub crops_saved: u64,
    /// Load failure, when the worker never became ready.
    pub failure: Option<String>,
}

impl WorkerReport {
    fn record(&mut self, result: &InferenceResult) {
        self.processed += 1;
        match result {
            InferenceResult::Noise => self.noise += 1,
            InferenceResult::Label(_) => self.labels += 1,
            InferenceResult::Unknown => self.unknown += 1,
        }
    }
}

pub struct LabelWorker;

impl LabelWorker {
    /// Start the worker thread. Models are loaded on that thread by `loader`.
    pub fn spawn(
        loader: OracleLoader,
        settings: &WorkerSettings,
        logger: ComponentLogger,
    ) -> Result<WorkerHandle> {
        let (candidate_tx, candidate_rx) = bounded(settings.channel_capacity);
        let (result_tx, result_rx) = unbounded();
        let (control_tx, control_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);

        let lifecycle = Lifecycle::new();
        let state = lifecycle.view();
        let worker = WorkerLoop {
            lifecycle,
            candidates: candidate_rx,
            results: result_tx,
            control: control_rx,
            idle_backoff: settings.idle_backoff,
            archive_dirs: settings
                .save_crops
                .then(|| (settings.noise_dir.clone(), settings.number_dir.clone())),
            logger: logger.clone(),
        };
        let join = std::thread::Builder::new()
            .name("label-worker".to_string())
            .spawn(move || worker.run(loader, ready_tx))
            .context("spawn label worker thread")?;

        Ok(WorkerHandle {
            candidates: candidate_tx,
            results: result_rx,
            control: control_tx,
            ready: ready_rx,
            ready_seen: AtomicBool::new(false),
            state,
            queued: 0,
            dropped: 0,
            received: 0,
            stop_sent: false,
            join: Some(join),
            logger,
        })
    }
}

/// Caller side of a running worker.
pub struct WorkerHandle {
    candidates: Sender<Candidate>,
    results: Receiver<InferenceResult>,
    control: Sender<Control>,
    ready: Receiver<()>,
    ready_seen: AtomicBool,
    state: StateView,
    queued: u64,
    dropped: u64,
    received: u64,
    stop_sent: bool,
    join: Option<JoinHandle<WorkerReport>>,
    logger: ComponentLogger,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Non-blocking readiness poll.
    pub fn is_ready(&self) -> bool {
        if self.ready_seen.load(Ordering::Acquire) {
            return true;
        }
        if self.ready.try_recv().is_ok() {
            self.ready_seen.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Wait for the readiness signal.
    ///
    /// Errors on timeout, and with the load failure when the worker exited
    /// without becoming ready.
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        if self.ready_seen.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.ready.recv_timeout(timeout) {
            Ok(()) => {
                self.ready_seen.store(true, Ordering::Release);
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                bail!("label worker not ready after {:?}", timeout)
            }
            Err(RecvTimeoutError::Disconnected) => {
                let reason = self
                    .join
                    .take()
                    .and_then(|handle| handle.join().ok())
                    .and_then(|report| report.failure)
                    .unwrap_or_else(|| "worker exited".to_string());
                Err(anyhow!("label worker failed to load models: {}", reason))
            }
        }
    }

    /// Queue a candidate without blocking.
    pub fn submit(&mut self, candidate: Candidate) -> SubmitOutcome {
        match self.candidates.try_send(candidate) {
            Ok(()) => {
                self.queued += 1;
                SubmitOutcome::Queued
            }
            Err(TrySendError::Full(candidate)) => {
                self.dropped += 1;
                self.logger.warn(format!(
                    "candidate channel full ({} queued), dropping candidate from frame {}",
                    self.candidates.len(),
                    candidate.frame_sequence
                ));
                SubmitOutcome::Dropped
            }
            Err(TrySendError::Disconnected(_)) => SubmitOutcome::Disconnected,
        }
    }

    /// Candidates waiting in the channel.
    pub fn pending(&self) -> usize {
        self.candidates.len()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.candidates.capacity()
    }

    /// Queued candidates whose result has not been received yet.
    pub fn outstanding(&self) -> u64 {
        self.queued.saturating_sub(self.received)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Next finished result, if any. Never blocks.
    pub fn try_result(&mut self) -> Option<InferenceResult> {
        match self.results.try_recv() {
            Ok(result) => {
                self.received += 1;
                Some(result)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Ask the worker to stop. Repeated calls are no-ops.
    pub fn stop(&mut self) {
        if self.stop_sent {
            return;
        }
        self.stop_sent = true;
        // Full means a stop is already queued; disconnected means it exited.
        let _ = self.control.try_send(Control::Stop);
    }

    /// Stop the worker and wait up to `timeout` for it to exit.
    pub fn join(&mut self, timeout: Duration) -> Result<WorkerReport> {
        self.stop();
        let handle = self
            .join
            .take()
            .ok_or_else(|| anyhow!("label worker already joined"))?;
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                // Detach; the thread exits on its own once it sees the stop.
                bail!("label worker did not stop within {:?}", timeout);
            }
            std::thread::sleep(JOIN_POLL);
        }
        let mut report = handle
            .join()
            .map_err(|_| anyhow!("label worker panicked"))?;
        report.dropped = self.dropped;
        Ok(report)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerLoop {
    lifecycle: Lifecycle,
    candidates: Receiver<Candidate>,
    results: Sender<InferenceResult>,
    control: Receiver<Control>,
    idle_backoff: Duration,
    archive_dirs: Option<(std::path::PathBuf, std::path::PathBuf)>,
    logger: ComponentLogger,
}

impl WorkerLoop {
    fn run(mut self, loader: OracleLoader, ready: Sender<()>) -> WorkerReport {
        let mut report = WorkerReport::default();
        self.lifecycle.begin_loading();
        self.logger.info("loading models");

        let (mut oracle, mut archive) = match self.load(loader) {
            Ok(loaded) => loaded,
            Err(err) => {
                self.logger
                    .error(format!("model load failed: {:#}", err));
                report.failure = Some(format!("{:#}", err));
                drop(ready);
                self.finish(&mut report);
                return report;
            }
        };

        if self.lifecycle.mark_ready() {
            self.logger.info(format!("models ready ({})", oracle.describe()));
            let _ = ready.send(());
        }
        drop(ready);
        self.lifecycle.mark_running();

        loop {
            match self.control.try_recv() {
                Ok(Control::Stop) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }
            let candidate = match self.candidates.recv_timeout(self.idle_backoff) {
                Ok(candidate) => candidate,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let result = match label_candidate(&mut oracle, &candidate) {
                Ok((class, result)) => {
                    if let Some(archive) = archive.as_mut() {
                        if let Err(err) = archive.save(&candidate.tight, class) {
                            self.logger.warn(format!("{:#}", err));
                        }
                    }
                    result
                }
                Err(err) => {
                    report.errors += 1;
                    self.logger.warn(format!(
                        "inference failed for frame {}: {:#}",
                        candidate.frame_sequence, err
                    ));
                    InferenceResult::Unknown
                }
            };
            self.logger.debug(format!(
                "frame {} {:?}: {:?}",
                candidate.frame_sequence, candidate.bbox, result
            ));
            report.record(&result);
            if self.results.send(result).is_err() {
                break;
            }
        }

        report.crops_saved = archive.as_ref().map_or(0, CropArchive::saved);
        self.finish(&mut report);
        report
    }

    fn load(&self, loader: OracleLoader) -> Result<(InferenceOracle, Option<CropArchive>)> {
        let mut oracle = loader()?;
        oracle.warm_up().context("model warm-up")?;
        let archive = match &self.archive_dirs {
            Some((noise, number)) => Some(CropArchive::prepare(noise, number)?),
            None => None,
        };
        Ok((oracle, archive))
    }

    fn finish(&mut self, report: &mut WorkerReport) {
        if self.lifecycle.begin_stopping() {
            self.logger.info(format!(
                "stopping after {} candidates ({} noise, {} labels, {} unknown)",
                report.processed, report.noise, report.labels, report.unknown
            ));
        }
        self.lifecycle.mark_stopped();
        report.final_state = Some(self.lifecycle.state());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DoorplateConfig;
    use crate::detect::{ScriptedAnswer, ScriptedOracle};
    use crate::extract::Rect;
    use image::RgbImage;

    fn candidate(sequence: u64) -> Candidate {
        Candidate {
            bbox: Rect::new(0, 0, 60, 30),
            tight: RgbImage::new(48, 48),
            context: RgbImage::new(96, 48),
            frame_sequence: sequence,
        }
    }

    fn settings() -> WorkerSettings {
        let mut settings = DoorplateConfig::default().worker;
        settings.channel_capacity = 4;
        settings
    }

    fn collect(handle: &mut WorkerHandle, count: usize) -> Vec<InferenceResult> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut results = Vec::new();
        while results.len() < count && Instant::now() < deadline {
            match handle.try_result() {
                Some(result) => results.push(result),
                None => std::thread::sleep(Duration::from_millis(1)),
            }
        }
        results
    }

    #[test]
    fn processes_candidates_in_order() -> Result<()> {
        let script = ScriptedOracle::new([
            ScriptedAnswer::Noise,
            ScriptedAnswer::classes(&[1, 0, 3]),
            ScriptedAnswer::Digits(Vec::new()),
        ]);
        let oracle = script.clone();
        let mut handle = LabelWorker::spawn(
            Box::new(move || Ok(oracle.oracle())),
            &settings(),
            ComponentLogger::root(),
        )?;
        handle.wait_ready(Duration::from_secs(5))?;

        for seq in 1..=3 {
            assert_eq!(handle.submit(candidate(seq)), SubmitOutcome::Queued);
        }
        let results = collect(&mut handle, 3);
        assert_eq!(
            results,
            vec![
                InferenceResult::Noise,
                InferenceResult::Label("103".into()),
                InferenceResult::Unknown,
            ]
        );
        assert_eq!(handle.outstanding(), 0);

        let report = handle.join(Duration::from_secs(5))?;
        assert_eq!(report.final_state, Some(WorkerState::Stopped));
        assert_eq!(report.processed, 3);
        assert_eq!((report.noise, report.labels, report.unknown), (1, 1, 1));
        Ok(())
    }

    #[test]
    fn inference_error_yields_unknown() -> Result<()> {
        let script = ScriptedOracle::new([ScriptedAnswer::Fail("tensor shape".into())]);
        let mut handle = LabelWorker::spawn(
            Box::new(move || Ok(script.oracle())),
            &settings(),
            ComponentLogger::root(),
        )?;
        handle.wait_ready(Duration::from_secs(5))?;
        handle.submit(candidate(1));
        assert_eq!(collect(&mut handle, 1), vec![InferenceResult::Unknown]);
        let report = handle.join(Duration::from_secs(5))?;
        assert_eq!(report.errors, 1);
        Ok(())
    }

    #[test]
    fn stop_is_idempotent() -> Result<()> {
        let mut handle = LabelWorker::spawn(
            Box::new(|| Ok(ScriptedOracle::default().oracle())),
            &settings(),
            ComponentLogger::root(),
        )?;
        handle.wait_ready(Duration::from_secs(5))?;
        handle.stop();
        handle.stop();
        let report = handle.join(Duration::from_secs(5))?;
        assert_eq!(report.final_state, Some(WorkerState::Stopped));
        assert!(handle.join(Duration::from_secs(1)).is_err());
        Ok(())
    }

    #[test]
    fn saves_crops_when_enabled() -> Result<()> {
        let root = tempfile::tempdir()?;
        let mut settings = settings();
        settings.save_crops = true;
        settings.noise_dir = root.path().join("noise");
        settings.number_dir = root.path().join("number");

        let script = ScriptedOracle::new([
            ScriptedAnswer::Noise,
            ScriptedAnswer::classes(&[4, 5, 6]),
        ]);
        let mut handle = LabelWorker::spawn(
            Box::new(move || Ok(script.oracle())),
            &settings,
            ComponentLogger::root(),
        )?;
        handle.wait_ready(Duration::from_secs(5))?;
        handle.submit(candidate(1));
        handle.submit(candidate(2));
        assert_eq!(collect(&mut handle, 2).len(), 2);
        let report = handle.join(Duration::from_secs(5))?;

        assert_eq!(report.crops_saved, 2);
        assert!(settings.noise_dir.join("0.png").is_file());
        assert!(settings.number_dir.join("1.png").is_file());
        Ok(())
    }
}
