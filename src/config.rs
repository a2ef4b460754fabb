use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extract::ChannelOrder;

const DEFAULT_DEVICE_INDEX: u32 = 0;
const DEFAULT_WINDOW_WIDTH: u32 = 640;
const DEFAULT_WINDOW_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 30;
const DEFAULT_TIGHT_PADDING: u32 = 5;
const DEFAULT_CONTEXT_PADDING: u32 = 100;
const DEFAULT_TIGHT_SIZE: u32 = 48;
const DEFAULT_CONTEXT_WIDTH: u32 = 96;
const DEFAULT_CONTEXT_HEIGHT: u32 = 48;
const DEFAULT_CANNY_LOW: f32 = 50.0;
const DEFAULT_CANNY_HIGH: f32 = 150.0;
const DEFAULT_CHANNEL_CAPACITY: usize = 100;
const DEFAULT_IDLE_BACKOFF_MS: u64 = 2;
const DEFAULT_READY_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 500;
const DEFAULT_NOISE_DIR: &str = "./crop_noise";
const DEFAULT_NUMBER_DIR: &str = "./crop_num";
const DEFAULT_NOISE_THRESHOLD: u32 = 15;
const DEFAULT_FPS_WINDOW: usize = 30;
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 5;
const DEFAULT_MODEL_BACKEND: &str = "heuristic";
const DEFAULT_CONTRAST_THRESHOLD: f32 = 40.0;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
const DEFAULT_NUM_CLASSES: usize = 11;
const DEFAULT_MQTT_BROKER: &str = "127.0.0.1:1883";
const DEFAULT_MQTT_TOPIC: &str = "doorplate/label";
const DEFAULT_MQTT_CLIENT_ID: &str = "doorplated";
const DEFAULT_MQTT_KEEP_ALIVE_SECS: u64 = 60;

#[derive(Debug, Deserialize, Default)]
struct DoorplateConfigFile {
    capture: Option<CaptureConfigFile>,
    extractor: Option<ExtractorConfigFile>,
    worker: Option<WorkerConfigFile>,
    aggregator: Option<AggregatorConfigFile>,
    models: Option<ModelConfigFile>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    device_index: Option<u32>,
    device: Option<String>,
    window_width: Option<u32>,
    window_height: Option<u32>,
    target_fps: Option<u32>,
    max_consecutive_failures: Option<u32>,
    frame_limit: Option<u64>,
    loop_playback: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ExtractorConfigFile {
    tight_padding: Option<u32>,
    context_padding: Option<u32>,
    tight_size: Option<u32>,
    context_width: Option<u32>,
    context_height: Option<u32>,
    canny_low: Option<f32>,
    canny_high: Option<f32>,
    channel_order: Option<ChannelOrder>,
}

#[derive(Debug, Deserialize, Default)]
struct WorkerConfigFile {
    channel_capacity: Option<usize>,
    idle_backoff_ms: Option<u64>,
    ready_timeout_secs: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
    drain_timeout_ms: Option<u64>,
    save_crops: Option<bool>,
    noise_dir: Option<PathBuf>,
    number_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct AggregatorConfigFile {
    noise_threshold: Option<u32>,
    fps_window: Option<usize>,
    status_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    noise_model_path: Option<PathBuf>,
    digit_model_path: Option<PathBuf>,
    contrast_threshold: Option<f32>,
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    num_classes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    enabled: Option<bool>,
    broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    ca_path: Option<PathBuf>,
    keep_alive_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DoorplateConfig {
    pub capture: CaptureSettings,
    pub extractor: ExtractorSettings,
    pub worker: WorkerSettings,
    pub aggregator: AggregatorSettings,
    pub models: ModelSettings,
    pub mqtt: MqttSettings,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Device URI: `/dev/videoN`, `stub://<name>` or `file://<dir>`.
    pub device: String,
    pub window_width: u32,
    pub window_height: u32,
    pub target_fps: u32,
    pub max_consecutive_failures: u32,
    /// Stop after this many frames (synthetic and file devices).
    pub frame_limit: Option<u64>,
    /// Restart file playback at the end instead of closing.
    pub loop_playback: bool,
}

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub window_width: u32,
    pub window_height: u32,
    pub tight_padding: u32,
    pub context_padding: u32,
    pub tight_size: u32,
    pub context_width: u32,
    pub context_height: u32,
    pub canny_low: f32,
    pub canny_high: f32,
    pub channel_order: ChannelOrder,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub channel_capacity: usize,
    pub idle_backoff: Duration,
    pub ready_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub drain_timeout: Duration,
    pub save_crops: bool,
    pub noise_dir: PathBuf,
    pub number_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub noise_threshold: u32,
    pub fps_window: usize,
    pub status_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: String,
    pub noise_model_path: Option<PathBuf>,
    pub digit_model_path: Option<PathBuf>,
    pub contrast_threshold: f32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub num_classes: usize,
    /// Stage-A input edge length (copied from the extractor tight size).
    pub tight_size: u32,
    /// Stage-B input size (copied from the extractor context size).
    pub context_width: u32,
    pub context_height: u32,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub enabled: bool,
    pub broker: String,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub ca_path: Option<PathBuf>,
    pub keep_alive: Duration,
}

impl Default for DoorplateConfig {
    fn default() -> Self {
        // Built-in defaults only; no environment overrides, no validation.
        Self::from_file(DoorplateConfigFile::default())
    }
}

impl DoorplateConfig {
    /// Load from `DOORPLATE_CONFIG` (if set), apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DOORPLATE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit path (or defaults), apply env overrides, validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => DoorplateConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DoorplateConfigFile) -> Self {
        let capture_file = file.capture.unwrap_or_default();
        let device = capture_file.device.unwrap_or_else(|| {
            device_uri_for_index(capture_file.device_index.unwrap_or(DEFAULT_DEVICE_INDEX))
        });
        let capture = CaptureSettings {
            device,
            window_width: capture_file.window_width.unwrap_or(DEFAULT_WINDOW_WIDTH),
            window_height: capture_file.window_height.unwrap_or(DEFAULT_WINDOW_HEIGHT),
            target_fps: capture_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            max_consecutive_failures: capture_file
                .max_consecutive_failures
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILURES),
            frame_limit: capture_file.frame_limit,
            loop_playback: capture_file.loop_playback.unwrap_or(false),
        };

        let extractor_file = file.extractor.unwrap_or_default();
        let extractor = ExtractorSettings {
            window_width: capture.window_width,
            window_height: capture.window_height,
            tight_padding: extractor_file.tight_padding.unwrap_or(DEFAULT_TIGHT_PADDING),
            context_padding: extractor_file
                .context_padding
                .unwrap_or(DEFAULT_CONTEXT_PADDING),
            tight_size: extractor_file.tight_size.unwrap_or(DEFAULT_TIGHT_SIZE),
            context_width: extractor_file.context_width.unwrap_or(DEFAULT_CONTEXT_WIDTH),
            context_height: extractor_file
                .context_height
                .unwrap_or(DEFAULT_CONTEXT_HEIGHT),
            canny_low: extractor_file.canny_low.unwrap_or(DEFAULT_CANNY_LOW),
            canny_high: extractor_file.canny_high.unwrap_or(DEFAULT_CANNY_HIGH),
            channel_order: extractor_file.channel_order.unwrap_or_default(),
        };

        let worker_file = file.worker.unwrap_or_default();
        let worker = WorkerSettings {
            channel_capacity: worker_file
                .channel_capacity
                .unwrap_or(DEFAULT_CHANNEL_CAPACITY),
            idle_backoff: Duration::from_millis(
                worker_file.idle_backoff_ms.unwrap_or(DEFAULT_IDLE_BACKOFF_MS),
            ),
            ready_timeout: Duration::from_secs(
                worker_file
                    .ready_timeout_secs
                    .unwrap_or(DEFAULT_READY_TIMEOUT_SECS),
            ),
            shutdown_timeout: Duration::from_secs(
                worker_file
                    .shutdown_timeout_secs
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            ),
            drain_timeout: Duration::from_millis(
                worker_file
                    .drain_timeout_ms
                    .unwrap_or(DEFAULT_DRAIN_TIMEOUT_MS),
            ),
            save_crops: worker_file.save_crops.unwrap_or(false),
            noise_dir: worker_file
                .noise_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_NOISE_DIR)),
            number_dir: worker_file
                .number_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_NUMBER_DIR)),
        };

        let aggregator_file = file.aggregator.unwrap_or_default();
        let aggregator = AggregatorSettings {
            noise_threshold: aggregator_file
                .noise_threshold
                .unwrap_or(DEFAULT_NOISE_THRESHOLD),
            fps_window: aggregator_file.fps_window.unwrap_or(DEFAULT_FPS_WINDOW),
            status_interval: Duration::from_secs(
                aggregator_file
                    .status_interval_secs
                    .unwrap_or(DEFAULT_STATUS_INTERVAL_SECS),
            ),
        };

        let model_file = file.models.unwrap_or_default();
        let models = ModelSettings {
            backend: model_file
                .backend
                .unwrap_or_else(|| DEFAULT_MODEL_BACKEND.to_string()),
            noise_model_path: model_file.noise_model_path,
            digit_model_path: model_file.digit_model_path,
            contrast_threshold: model_file
                .contrast_threshold
                .unwrap_or(DEFAULT_CONTRAST_THRESHOLD),
            confidence_threshold: model_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            nms_threshold: model_file.nms_threshold.unwrap_or(DEFAULT_NMS_THRESHOLD),
            num_classes: model_file.num_classes.unwrap_or(DEFAULT_NUM_CLASSES),
            tight_size: extractor.tight_size,
            context_width: extractor.context_width,
            context_height: extractor.context_height,
        };

        let mqtt_file = file.mqtt.unwrap_or_default();
        let mqtt = MqttSettings {
            enabled: mqtt_file.enabled.unwrap_or(true),
            broker: mqtt_file
                .broker
                .unwrap_or_else(|| DEFAULT_MQTT_BROKER.to_string()),
            topic: mqtt_file
                .topic
                .unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
            client_id: mqtt_file
                .client_id
                .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            username: mqtt_file.username,
            password: mqtt_file.password,
            use_tls: mqtt_file.use_tls.unwrap_or(false),
            ca_path: mqtt_file.ca_path,
            keep_alive: Duration::from_secs(
                mqtt_file
                    .keep_alive_secs
                    .unwrap_or(DEFAULT_MQTT_KEEP_ALIVE_SECS),
            ),
        };

        Self {
            capture,
            extractor,
            worker,
            aggregator,
            models,
            mqtt,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("DOORPLATE_DEVICE") {
            let device = device.trim();
            if !device.is_empty() {
                self.capture.device = match device.parse::<u32>() {
                    Ok(index) => device_uri_for_index(index),
                    Err(_) => device.to_string(),
                };
            }
        }
        if let Ok(broker) = std::env::var("DOORPLATE_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                self.mqtt.broker = broker.trim().to_string();
            }
        }
        if let Ok(topic) = std::env::var("DOORPLATE_MQTT_TOPIC") {
            if !topic.trim().is_empty() {
                self.mqtt.topic = topic.trim().to_string();
            }
        }
        if let Ok(backend) = std::env::var("DOORPLATE_MODEL_BACKEND") {
            if !backend.trim().is_empty() {
                self.models.backend = backend.trim().to_string();
            }
        }
        if let Ok(flag) = std::env::var("DOORPLATE_SAVE_CROPS") {
            self.worker.save_crops = parse_bool(&flag)
                .ok_or_else(|| anyhow!("DOORPLATE_SAVE_CROPS must be true or false"))?;
        }
        if let Ok(threshold) = std::env::var("DOORPLATE_NOISE_THRESHOLD") {
            self.aggregator.noise_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("DOORPLATE_NOISE_THRESHOLD must be a non-negative integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.capture.window_width == 0 || self.capture.window_height == 0 {
            return Err(anyhow!("window width and height must be greater than zero"));
        }
        if self.extractor.tight_size == 0
            || self.extractor.context_width == 0
            || self.extractor.context_height == 0
        {
            return Err(anyhow!("classifier input sizes must be greater than zero"));
        }
        if self.extractor.canny_low > self.extractor.canny_high {
            return Err(anyhow!(
                "canny_low ({}) must not exceed canny_high ({})",
                self.extractor.canny_low,
                self.extractor.canny_high
            ));
        }
        if self.worker.channel_capacity == 0 {
            return Err(anyhow!("candidate channel capacity must be greater than zero"));
        }
        if self.aggregator.fps_window == 0 {
            return Err(anyhow!("fps window must hold at least one sample"));
        }
        if self.worker.save_crops && self.worker.noise_dir == self.worker.number_dir {
            return Err(anyhow!(
                "noise and number crop directories must differ ({})",
                self.worker.noise_dir.display()
            ));
        }
        if self.mqtt.topic.trim().is_empty() {
            return Err(anyhow!("mqtt topic must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.models.confidence_threshold)
            || !(0.0..=1.0).contains(&self.models.nms_threshold)
        {
            return Err(anyhow!("model thresholds must be within 0..=1"));
        }
        self.models.backend = self.models.backend.to_lowercase();
        Ok(())
    }
}

/// `/dev/video<index>` for a numeric camera index.
pub fn device_uri_for_index(index: u32) -> String {
    format!("/dev/video{}", index)
}

fn read_config_file(path: &Path) -> Result<DoorplateConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
