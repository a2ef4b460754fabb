//! Inference port: Stage A (noise classifier) and Stage B (digit detector)
//! behind one `InferenceOracle`, with backends selected by name.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{DigitDetector, InferenceOracle, NoiseClassifier};
pub use backends::{
    boxes_for_classes, HeuristicClassifier, NullDigitDetector, ScriptedAnswer, ScriptedOracle,
};
#[cfg(feature = "backend-tract")]
pub use backends::{TractDigitDetector, TractNoiseClassifier, TractOracle};
pub use registry::{BackendLoader, BackendRegistry, OracleLoader};
pub use result::{non_max_suppression, DigitBox, PlateClass, ZERO_CLASS};
