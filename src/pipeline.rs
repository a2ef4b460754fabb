//! The extraction/aggregation loop and its shutdown sequence.
//!
//! ```text
//! FrameSource ─read─▶ CandidateExtractor ─submit─▶ LabelWorker
//!                                                      │ results
//!                     Publisher ◀─accepted─ ResultAggregator
//! ```
//!
//! Only `FrameSource::read_timeout` waits; submitting candidates and polling
//! results never block.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::aggregate::{LabelUpdate, ResultAggregator};
use crate::config::DoorplateConfig;
use crate::detect::{BackendRegistry, OracleLoader};
use crate::extract::CandidateExtractor;
use crate::frame::{Frame, SlotRead};
use crate::ingest::{CaptureStats, FrameSource};
use crate::publish::{LabelPayload, Publisher};
use crate::telemetry::ComponentLogger;
use crate::worker::{LabelWorker, SubmitOutcome, WorkerHandle, WorkerReport};

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const DRAIN_POLL: Duration = Duration::from_millis(2);

/// Totals for one pipeline run.
#[derive(Clone, Debug, Default)]
pub struct PipelineReport {
    pub frames: u64,
    pub candidates: u64,
    pub dropped_candidates: u64,
    pub results: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub clears: u64,
    pub final_label: String,
    pub fps: f64,
    pub capture: CaptureStats,
    /// `None` when the worker did not stop within the shutdown timeout.
    pub worker: Option<WorkerReport>,
}

pub struct Pipeline {
    config: DoorplateConfig,
    source: FrameSource,
    extractor: CandidateExtractor,
    worker: WorkerHandle,
    aggregator: ResultAggregator,
    publisher: Box<dyn Publisher>,
    report: PipelineReport,
    logger: ComponentLogger,
}

impl Pipeline {
    /// Start the worker with the configured backend, wait for readiness,
    /// then open the capture device.
    pub fn start(
        config: DoorplateConfig,
        registry: &BackendRegistry,
        publisher: Box<dyn Publisher>,
        logger: ComponentLogger,
    ) -> Result<Self> {
        let loader = registry.loader_for(&config.models)?;
        Self::start_with_loader(config, loader, publisher, logger)
    }

    pub fn start_with_loader(
        config: DoorplateConfig,
        loader: OracleLoader,
        publisher: Box<dyn Publisher>,
        logger: ComponentLogger,
    ) -> Result<Self> {
        let mut worker = LabelWorker::spawn(loader, &config.worker, logger.child("worker"))?;
        worker.wait_ready(config.worker.ready_timeout)?;

        let source = match FrameSource::open(&config.capture, logger.child("capture")) {
            Ok(source) => source,
            Err(err) => {
                if let Err(join_err) = worker.join(config.worker.shutdown_timeout) {
                    logger.error(format!("{:#}", join_err));
                }
                return Err(err);
            }
        };
        let extractor = CandidateExtractor::new(config.extractor.clone(), logger.child("extract"));
        let aggregator = ResultAggregator::new(&config.aggregator, logger.child("aggregate"));

        Ok(Self {
            config,
            source,
            extractor,
            worker,
            aggregator,
            publisher,
            report: PipelineReport::default(),
            logger,
        })
    }

    /// Run until `shutdown` is set or the capture source closes, then shut
    /// everything down in order.
    pub fn run(mut self, shutdown: &AtomicBool) -> Result<PipelineReport> {
        let outcome = self.run_loop(shutdown);
        let report = self.shutdown();
        outcome.map(|()| report)
    }

    fn run_loop(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let mut last_status = Instant::now();
        while !shutdown.load(Ordering::Acquire) {
            match self.source.read_timeout(READ_TIMEOUT) {
                SlotRead::Frame(frame) => self.process_frame(&frame)?,
                SlotRead::TimedOut => {}
                SlotRead::Closed => {
                    self.logger.info("capture source closed");
                    break;
                }
            }
            self.poll_results();

            if last_status.elapsed() >= self.config.aggregator.status_interval {
                last_status = Instant::now();
                self.logger.info(format!(
                    "fps {:.1}, label '{}', {} queued, {} dropped",
                    self.aggregator.fps(),
                    self.aggregator.current_label(),
                    self.worker.pending(),
                    self.worker.dropped()
                ));
            }
        }
        Ok(())
    }

    fn process_frame(&mut self, frame: &Frame) -> Result<()> {
        self.report.frames += 1;
        for candidate in self.extractor.extract(frame) {
            self.report.candidates += 1;
            match self.worker.submit(candidate) {
                SubmitOutcome::Queued => {}
                SubmitOutcome::Dropped => self.report.dropped_candidates += 1,
                SubmitOutcome::Disconnected => bail!("label worker exited unexpectedly"),
            }
        }
        self.aggregator.tick();
        Ok(())
    }

    fn poll_results(&mut self) {
        while let Some(result) = self.worker.try_result() {
            self.report.results += 1;
            match self.aggregator.ingest(&result) {
                LabelUpdate::Accepted(label) => self.publish(label),
                LabelUpdate::Cleared => self.report.clears += 1,
                LabelUpdate::Unchanged => {}
            }
        }
    }

    fn publish(&mut self, label: String) {
        let payload = LabelPayload::new(label);
        match self.publisher.publish(&self.config.mqtt.topic, &payload) {
            Ok(()) => self.report.published += 1,
            Err(err) => {
                self.report.publish_failures += 1;
                self.logger.warn(format!(
                    "{} publish failed: {:#}",
                    self.publisher.name(),
                    err
                ));
            }
        }
    }

    /// Stop capture, let queued candidates finish (bounded by the drain
    /// timeout), stop and join the worker, release the device, disconnect
    /// the publisher.
    fn shutdown(mut self) -> PipelineReport {
        self.logger.info("shutting down");
        self.source.stop_capture();

        let drain_deadline = Instant::now() + self.config.worker.drain_timeout;
        while self.worker.outstanding() > 0 && Instant::now() < drain_deadline {
            self.poll_results();
            std::thread::sleep(DRAIN_POLL);
        }

        self.worker.stop();
        self.report.worker = match self.worker.join(self.config.worker.shutdown_timeout) {
            Ok(report) => Some(report),
            Err(err) => {
                self.logger.error(format!("{:#}", err));
                None
            }
        };
        self.poll_results();

        self.source.release();
        if let Err(err) = self.publisher.shutdown() {
            self.logger
                .warn(format!("{} shutdown failed: {:#}", self.publisher.name(), err));
        }

        self.report.capture = self.source.stats();
        self.report.final_label = self.aggregator.current_label().to_string();
        self.report.fps = self.aggregator.fps();
        self.logger.info(format!(
            "stopped: {} frames, {} candidates ({} dropped), {} results, {} published",
            self.report.frames,
            self.report.candidates,
            self.report.dropped_candidates,
            self.report.results,
            self.report.published
        ));
        self.report
    }
}
