use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::ModelSettings;

use super::backend::InferenceOracle;
use super::backends::HeuristicClassifier;
#[cfg(feature = "backend-tract")]
use super::backends::TractOracle;

/// Builds an oracle from model settings. Runs on the worker thread.
pub type BackendLoader = Arc<dyn Fn(&ModelSettings) -> Result<InferenceOracle> + Send + Sync>;

/// A loader bound to its settings, ready to be moved into the worker.
pub type OracleLoader = Box<dyn FnOnce() -> Result<InferenceOracle> + Send>;

/// Registry of inference backends by name.
///
/// Backends are chosen once at construction time; the worker only ever sees
/// the resulting `InferenceOracle`.
pub struct BackendRegistry {
    loaders: BTreeMap<String, BackendLoader>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            loaders: BTreeMap::new(),
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("heuristic", |settings: &ModelSettings| {
            Ok(HeuristicClassifier::oracle(settings.contrast_threshold))
        });
        #[cfg(feature = "backend-tract")]
        registry.register("tract", TractOracle::load);
        registry
    }

    /// Register a loader. A later registration under the same name wins.
    pub fn register<F>(&mut self, name: &str, loader: F)
    where
        F: Fn(&ModelSettings) -> Result<InferenceOracle> + Send + Sync + 'static,
    {
        self.loaders.insert(name.to_string(), Arc::new(loader));
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        self.loaders.keys().cloned().collect()
    }

    /// Bind the loader for `settings.backend` to a copy of `settings`.
    ///
    /// Nothing is loaded here; the returned closure runs on the worker.
    pub fn loader_for(&self, settings: &ModelSettings) -> Result<OracleLoader> {
        let loader = self.loaders.get(&settings.backend).cloned().ok_or_else(|| {
            anyhow!(
                "unknown model backend '{}' (available: {})",
                settings.backend,
                self.list().join(", ")
            )
        })?;
        let settings = settings.clone();
        Ok(Box::new(move || loader(&settings)))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DoorplateConfig;

    #[test]
    fn builtin_registry_loads_heuristic_backend() -> Result<()> {
        let registry = BackendRegistry::with_builtin();
        assert!(registry.list().contains(&"heuristic".to_string()));

        let settings = DoorplateConfig::default().models;
        let load = registry.loader_for(&settings)?;
        let oracle = load()?;
        assert_eq!(oracle.describe(), "heuristic/heuristic");
        Ok(())
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let registry = BackendRegistry::with_builtin();
        let mut settings = DoorplateConfig::default().models;
        settings.backend = "cuda".into();
        let err = registry.loader_for(&settings).err().expect("must fail");
        assert!(err.to_string().contains("heuristic"));
    }

    #[test]
    fn registered_backend_is_resolved_by_name() -> Result<()> {
        let mut registry = BackendRegistry::new();
        let mut settings = DoorplateConfig::default().models;
        settings.backend = "b".into();
        assert!(registry.loader_for(&settings).is_err());

        registry.register("b", |s: &ModelSettings| {
            Ok(HeuristicClassifier::oracle(s.contrast_threshold))
        });
        registry.register("a", |s: &ModelSettings| {
            Ok(HeuristicClassifier::oracle(s.contrast_threshold))
        });
        assert_eq!(registry.list(), vec!["a".to_string(), "b".to_string()]);
        let load = registry.loader_for(&settings)?;
        assert!(load().is_ok());
        Ok(())
    }
}
