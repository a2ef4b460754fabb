//! Per-component log handles.
//!
//! Components receive a `ComponentLogger` at construction instead of choosing
//! a log target themselves. Records still flow through the `log` facade, so
//! `RUST_LOG=doorplate::worker=debug` style filters work as usual.

use std::fmt::Display;

/// Named log target handed to a component.
#[derive(Clone, Debug)]
pub struct ComponentLogger {
    target: String,
}

impl ComponentLogger {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Root logger for the daemon.
    pub fn root() -> Self {
        Self::new("doorplate")
    }

    /// Derive a logger for a sub-component (`parent::name`).
    pub fn child(&self, name: &str) -> Self {
        Self::new(format!("{}::{}", self.target, name))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn error(&self, message: impl Display) {
        log::error!(target: self.target.as_str(), "{}", message);
    }

    pub fn warn(&self, message: impl Display) {
        log::warn!(target: self.target.as_str(), "{}", message);
    }

    pub fn info(&self, message: impl Display) {
        log::info!(target: self.target.as_str(), "{}", message);
    }

    pub fn debug(&self, message: impl Display) {
        log::debug!(target: self.target.as_str(), "{}", message);
    }
}

impl Default for ComponentLogger {
    fn default() -> Self {
        Self::root()
    }
}
