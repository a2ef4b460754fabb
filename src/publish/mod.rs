//! Publishing accepted labels.
//!
//! Payload is `{"label": "<label>"}`. Publishing is fire-and-forget: the
//! extraction loop never waits for acknowledgements.

mod endpoint;
mod mqtt;

pub use endpoint::BrokerAddress;
pub use mqtt::MqttPublisher;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::config::MqttSettings;
use crate::telemetry::ComponentLogger;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPayload {
    pub label: String,
}

impl LabelPayload {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

pub trait Publisher: Send {
    fn name(&self) -> &'static str;

    fn publish(&mut self, topic: &str, payload: &LabelPayload) -> Result<()>;

    /// Flush and disconnect.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Logs labels instead of sending them (dry runs).
pub struct LogPublisher {
    logger: ComponentLogger,
}

impl LogPublisher {
    pub fn new(logger: ComponentLogger) -> Self {
        Self { logger }
    }
}

impl Publisher for LogPublisher {
    fn name(&self) -> &'static str {
        "log"
    }

    fn publish(&mut self, topic: &str, payload: &LabelPayload) -> Result<()> {
        let body = serde_json::to_string(payload)?;
        self.logger.info(format!("{} <- {}", topic, body));
        Ok(())
    }
}

/// Keeps every publication in memory. Clones share the same record.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<(String, LabelPayload)>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, LabelPayload)> {
        self.published
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn labels(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .map(|(_, payload)| payload.label)
            .collect()
    }
}

impl Publisher for RecordingPublisher {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn publish(&mut self, topic: &str, payload: &LabelPayload) -> Result<()> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((topic.to_string(), payload.clone()));
        Ok(())
    }
}

/// MQTT publisher, or a log publisher when MQTT is disabled or `dry_run` is
/// set.
pub fn publisher_from_settings(
    settings: &MqttSettings,
    dry_run: bool,
    logger: ComponentLogger,
) -> Result<Box<dyn Publisher>> {
    if dry_run || !settings.enabled {
        return Ok(Box::new(LogPublisher::new(logger)));
    }
    Ok(Box::new(MqttPublisher::connect(settings, logger)?))
}
