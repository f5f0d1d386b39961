//! Ensemble prediction pipeline: combination, risk classification,
//! attribution and the orchestrating engine.

pub mod attribution;
pub mod combiner;
pub mod confidence;
pub mod engine;
pub mod fan_out;
pub mod risk_classifier;
pub mod snapshot;
pub mod stage;

pub use attribution::{RankedFeatures, ShapCalculator, aggregate_features};
pub use combiner::{CombinedScore, EnsembleCombiner};
pub use confidence::{ConfidenceFactors, ConfidenceSynthesizer};
pub use engine::{EngineServices, PredictionEngine};
pub use risk_classifier::{RiskAssessment, RiskClassifier};
pub use snapshot::{EngineSnapshot, SnapshotCell};
pub use stage::{PredictionRun, PredictionStage};
