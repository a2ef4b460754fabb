pub mod heuristic;
pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use heuristic::{HeuristicClassifier, NullDigitDetector};
pub use scripted::{boxes_for_classes, ScriptedAnswer, ScriptedOracle};

#[cfg(feature = "backend-tract")]
pub use tract::{TractDigitDetector, TractNoiseClassifier, TractOracle};
