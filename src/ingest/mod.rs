//! Frame ingestion.
//!
//! A `CaptureDevice` is driven by a dedicated producer thread owned by
//! `FrameSource`. The producer writes every grabbed frame into a single-slot
//! holder, replacing whatever was not read yet, so consumers only ever see the
//! newest frame.
//!
//! Devices:
//! - `stub://<name>`: synthetic frames with a plate-shaped rectangle (testing)
//! - `file://<dir>`: replays the image files of a directory
//! - `/dev/videoN`: USB/V4L2 camera (feature: ingest-v4l2)

pub mod images;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use images::ImageSequenceDevice;
pub use synthetic::SyntheticDevice;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::bounded;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::CaptureSettings;
use crate::frame::{Frame, FrameSlot, SlotRead};
use crate::telemetry::ComponentLogger;

const OPEN_TIMEOUT: Duration = Duration::from_secs(10);
const FAILURE_BACKOFF: Duration = Duration::from_millis(10);

/// Outcome of one `CaptureDevice::grab` call.
#[derive(Debug)]
pub enum Grab {
    Frame(RgbImage),
    /// The device returned no frame this time (`ok = false`); try again.
    Skipped,
    /// The device will not produce any more frames.
    EndOfStream,
}

/// Camera device seam.
///
/// Devices are created, opened, read and released on the producer thread, so
/// implementations do not need to be `Send`.
pub trait CaptureDevice {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<()>;

    fn is_opened(&self) -> bool;

    /// Pull the next frame. Implementations may block for up to one frame
    /// interval.
    fn grab(&mut self) -> Result<Grab>;

    fn release(&mut self);
}

/// Builds the device on the producer thread, handing it its logger.
pub type DeviceFactory =
    Box<dyn FnOnce(ComponentLogger) -> Result<Box<dyn CaptureDevice>> + Send>;

/// Capture counters.
#[derive(Clone, Debug, Default)]
pub struct CaptureStats {
    pub device: String,
    pub frames_captured: u64,
    /// Frames overwritten before the consumer read them.
    pub frames_dropped: u64,
    pub read_failures: u64,
}

/// Build the device named by `settings.device`.
pub fn open_device(
    settings: &CaptureSettings,
    logger: ComponentLogger,
) -> Result<Box<dyn CaptureDevice>> {
    let uri = settings.device.trim();
    if uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticDevice::new(
            uri,
            settings.window_width,
            settings.window_height,
            settings.target_fps,
            settings.frame_limit,
            logger,
        )));
    }
    if let Some(dir) = uri.strip_prefix("file://") {
        return Ok(Box::new(ImageSequenceDevice::new(
            dir,
            settings.loop_playback,
            settings.frame_limit,
            logger,
        )));
    }
    if uri.starts_with("/dev/") {
        return open_v4l2(uri, settings, logger);
    }
    bail!("unsupported capture device '{}'", uri)
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(
    uri: &str,
    settings: &CaptureSettings,
    logger: ComponentLogger,
) -> Result<Box<dyn CaptureDevice>> {
    Ok(Box::new(V4l2Device::new(
        uri,
        settings.window_width,
        settings.window_height,
        settings.target_fps,
        logger,
    )))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(
    uri: &str,
    _settings: &CaptureSettings,
    _logger: ComponentLogger,
) -> Result<Box<dyn CaptureDevice>> {
    bail!(
        "capture device {} requires the ingest-v4l2 feature (rebuild with --features ingest-v4l2)",
        uri
    )
}

/// Bufferless frame source: a producer thread plus a single-slot holder.
pub struct FrameSource {
    device_name: String,
    slot: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
    opened: Arc<AtomicBool>,
    read_failures: Arc<AtomicU64>,
    producer: Option<JoinHandle<()>>,
    logger: ComponentLogger,
}

impl FrameSource {
    /// Open the device named in `settings` and start capturing.
    pub fn open(settings: &CaptureSettings, logger: ComponentLogger) -> Result<Self> {
        let device_settings = settings.clone();
        Self::start(
            settings.device.clone(),
            Box::new(move |logger| open_device(&device_settings, logger)),
            settings.max_consecutive_failures,
            logger,
        )
    }

    /// Spawn the producer thread. Returns once the device has opened, or with
    /// the open error.
    pub fn start(
        device_name: String,
        factory: DeviceFactory,
        max_consecutive_failures: u32,
        logger: ComponentLogger,
    ) -> Result<Self> {
        let slot = Arc::new(FrameSlot::new());
        let running = Arc::new(AtomicBool::new(true));
        let opened = Arc::new(AtomicBool::new(false));
        let read_failures = Arc::new(AtomicU64::new(0));
        let (open_tx, open_rx) = bounded::<Result<()>>(1);

        let producer = Producer {
            slot: slot.clone(),
            running: running.clone(),
            opened: opened.clone(),
            read_failures: read_failures.clone(),
            max_consecutive_failures: max_consecutive_failures.max(1),
            logger: logger.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("frame-producer".to_string())
            .spawn(move || producer.run(factory, open_tx))
            .context("spawn frame producer thread")?;

        let open_result = open_rx
            .recv_timeout(OPEN_TIMEOUT)
            .map_err(|_| anyhow!("capture device {} did not open in time", device_name))
            .and_then(|result| result);
        if let Err(err) = open_result {
            running.store(false, Ordering::Release);
            let _ = handle.join();
            return Err(err.context(format!("open capture device {}", device_name)));
        }

        logger.info(format!("capturing from {}", device_name));
        Ok(Self {
            device_name,
            slot,
            running,
            opened,
            read_failures,
            producer: Some(handle),
            logger,
        })
    }

    /// True while the device is open and the producer is running.
    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Block until a frame exists. `None` once the source has closed and no
    /// frame is pending.
    pub fn read(&self) -> Option<Frame> {
        match self.slot.take(None) {
            SlotRead::Frame(frame) => Some(frame),
            SlotRead::TimedOut | SlotRead::Closed => None,
        }
    }

    /// Wait at most `timeout` for a frame.
    pub fn read_timeout(&self, timeout: Duration) -> SlotRead {
        self.slot.take(Some(timeout))
    }

    /// Ask the producer to stop. Readers are woken once it exits.
    pub fn stop_capture(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Stop capturing, wait for the producer and release the device.
    pub fn release(&mut self) {
        self.stop_capture();
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                self.logger.error("frame producer panicked");
            }
            self.slot.close();
            self.logger.info(format!("released {}", self.device_name));
        }
    }

    pub fn stats(&self) -> CaptureStats {
        let slot = self.slot.stats();
        CaptureStats {
            device: self.device_name.clone(),
            frames_captured: slot.written,
            frames_dropped: slot.overwritten,
            read_failures: self.read_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

struct Producer {
    slot: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
    opened: Arc<AtomicBool>,
    read_failures: Arc<AtomicU64>,
    max_consecutive_failures: u32,
    logger: ComponentLogger,
}

impl Producer {
    fn run(self, factory: DeviceFactory, open_tx: crossbeam_channel::Sender<Result<()>>) {
        let mut device = match factory(self.logger.child("device")).and_then(|mut device| {
            device.open()?;
            Ok(device)
        }) {
            Ok(device) => device,
            Err(err) => {
                let _ = open_tx.send(Err(err));
                self.slot.close();
                return;
            }
        };
        self.opened.store(true, Ordering::Release);
        let _ = open_tx.send(Ok(()));

        let mut sequence = 0u64;
        let mut consecutive_failures = 0u32;
        while self.running.load(Ordering::Acquire) {
            match device.grab() {
                Ok(Grab::Frame(image)) => {
                    consecutive_failures = 0;
                    sequence += 1;
                    self.slot.put(Frame::new(image, sequence));
                }
                Ok(Grab::Skipped) => std::thread::yield_now(),
                Ok(Grab::EndOfStream) => {
                    self.logger
                        .info(format!("{}: end of stream after {} frames", device.name(), sequence));
                    break;
                }
                Err(err) => {
                    consecutive_failures += 1;
                    self.read_failures.fetch_add(1, Ordering::Relaxed);
                    self.logger
                        .warn(format!("{}: frame grab failed: {:#}", device.name(), err));
                    if consecutive_failures >= self.max_consecutive_failures {
                        self.logger.error(format!(
                            "{}: giving up after {} consecutive failures",
                            device.name(),
                            consecutive_failures
                        ));
                        break;
                    }
                    std::thread::sleep(FAILURE_BACKOFF);
                }
            }
        }

        device.release();
        self.opened.store(false, Ordering::Release);
        self.slot.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedDevice {
        grabs: VecDeque<Result<Grab>>,
        opened: bool,
    }

    impl CaptureDevice for ScriptedDevice {
        fn name(&self) -> &str {
            "scripted"
        }

        fn open(&mut self) -> Result<()> {
            self.opened = true;
            Ok(())
        }

        fn is_opened(&self) -> bool {
            self.opened
        }

        fn grab(&mut self) -> Result<Grab> {
            self.grabs.pop_front().unwrap_or(Ok(Grab::EndOfStream))
        }

        fn release(&mut self) {
            self.opened = false;
        }
    }

    fn scripted(grabs: Vec<Result<Grab>>) -> DeviceFactory {
        Box::new(move |_logger| {
            Ok(Box::new(ScriptedDevice {
                grabs: grabs.into(),
                opened: false,
            }) as Box<dyn CaptureDevice>)
        })
    }

    #[test]
    fn read_returns_latest_frame_only() {
        let grabs = (0..4)
            .map(|i| Ok(Grab::Frame(RgbImage::from_pixel(2, 2, image::Rgb([i, i, i])))))
            .collect();
        let mut source =
            FrameSource::start("scripted".into(), scripted(grabs), 3, ComponentLogger::root())
                .expect("start");

        // The producer runs to end-of-stream before the first read.
        while source.is_opened() {
            std::thread::sleep(Duration::from_millis(1));
        }
        let frame = source.read().expect("pending frame");
        assert_eq!(frame.sequence, 4);
        assert!(source.read().is_none());

        let stats = source.stats();
        assert_eq!(stats.frames_captured, 4);
        assert_eq!(stats.frames_dropped, 3);
        source.release();
    }

    #[test]
    fn skipped_grabs_do_not_produce_frames() {
        let grabs = vec![
            Ok(Grab::Skipped),
            Ok(Grab::Frame(RgbImage::new(2, 2))),
            Ok(Grab::Skipped),
        ];
        let source =
            FrameSource::start("scripted".into(), scripted(grabs), 3, ComponentLogger::root())
                .expect("start");
        let frame = source.read().expect("frame");
        assert_eq!(frame.sequence, 1);
        assert!(source.read().is_none());
    }

    #[test]
    fn producer_stops_after_consecutive_failures() {
        let grabs = (0..5).map(|_| Err(anyhow!("device unplugged"))).collect();
        let source =
            FrameSource::start("scripted".into(), scripted(grabs), 2, ComponentLogger::root())
                .expect("start");
        assert!(source.read().is_none());
        assert!(!source.is_opened());
        assert_eq!(source.stats().read_failures, 2);
    }

    #[test]
    fn open_failure_is_reported() {
        let factory: DeviceFactory = Box::new(|_logger| Err(anyhow!("no such camera")));
        let err = FrameSource::start("missing".into(), factory, 1, ComponentLogger::root())
            .err()
            .expect("open must fail");
        assert!(format!("{:#}", err).contains("no such camera"));
    }

    #[test]
    fn unknown_device_scheme_is_rejected() {
        let settings = CaptureSettings {
            device: "rtsp://camera".into(),
            window_width: 64,
            window_height: 48,
            target_fps: 0,
            max_consecutive_failures: 1,
            frame_limit: None,
            loop_playback: false,
        };
        assert!(open_device(&settings, ComponentLogger::root()).is_err());
    }

    #[test]
    fn device_logs_under_source_target() {
        let (target_tx, target_rx) = bounded(1);
        let factory: DeviceFactory = Box::new(move |logger| {
            let _ = target_tx.send(logger.target().to_string());
            Ok(Box::new(ScriptedDevice {
                grabs: VecDeque::new(),
                opened: false,
            }) as Box<dyn CaptureDevice>)
        });
        let capture = ComponentLogger::root().child("capture");
        let source = FrameSource::start("scripted".into(), factory, 1, capture).expect("start");
        assert_eq!(
            target_rx.recv_timeout(Duration::from_secs(1)).ok().as_deref(),
            Some("doorplate::capture::device")
        );
        assert!(source.read().is_none());
    }
}
