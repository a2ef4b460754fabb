//! Door-number plate reader.
//!
//! Locates door-number plates in a live video stream, classifies each
//! candidate region as noise or number, decodes the digits and publishes the
//! current label.
//!
//! # Architecture
//!
//! Three units of execution, connected only by channels and the frame slot:
//!
//! 1. **Capture** (`ingest`): a producer thread pulls frames from the device
//!    into a single-slot, drop-oldest holder (`frame::FrameSlot`).
//! 2. **Extraction loop** (`pipeline`): reads the newest frame, extracts
//!    candidates (`extract`), submits them to the worker without blocking,
//!    polls results into the aggregator (`aggregate`) and publishes accepted
//!    labels (`publish`).
//! 3. **Label worker** (`worker`): owns both classifiers (`detect`), loads
//!    them once, signals readiness once, and answers each candidate with
//!    `Noise`, `Label(..)` or `Unknown`.
//!
//! # Module Structure
//!
//! - `config`: `DoorplateConfig` (file + environment + validation)
//! - `frame`: `Frame`, `FrameSlot`
//! - `ingest`: `CaptureDevice` adapters and `FrameSource`
//! - `extract`: contour extraction, noise filter, `Candidate`
//! - `detect`: inference port and backends
//! - `worker`: `LabelWorker`, lifecycle, label assembly, crop archive
//! - `aggregate`: `StickyLabel`, `FpsWindow`, `ResultAggregator`
//! - `publish`: `Publisher` and its MQTT/log/recording implementations
//! - `pipeline`: wiring and shutdown order
//! - `telemetry`: per-component log targets

pub mod aggregate;
pub mod config;
pub mod detect;
pub mod extract;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod publish;
pub mod telemetry;
pub mod worker;

pub use aggregate::{FpsWindow, LabelUpdate, ResultAggregator, StickyLabel};
pub use config::DoorplateConfig;
pub use detect::{BackendRegistry, DigitBox, InferenceOracle, PlateClass};
pub use extract::{is_noise, Candidate, CandidateExtractor, Rect, Window};
pub use frame::{Frame, FrameSlot};
pub use ingest::{CaptureDevice, FrameSource};
pub use pipeline::{Pipeline, PipelineReport};
pub use publish::{LabelPayload, Publisher};
pub use telemetry::ComponentLogger;
pub use worker::{InferenceResult, LabelWorker, WorkerHandle, WorkerReport, WorkerState};
