use crate::domain::prediction::types::{ModelType, PredictionContext};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors raised when caller-supplied inputs or configuration are unusable
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("No model outputs supplied")]
    EmptyOutputs,

    #[error("Duplicate model type in one call: {model_type}")]
    DuplicateModelType { model_type: ModelType },

    #[error("Unknown model type: {name}")]
    UnknownModelType { name: String },

    #[error("Unknown risk profile: {name}")]
    UnknownRiskProfile { name: String },

    #[error("{field} out of range: {value}")]
    OutOfRange { field: String, value: f64 },

    #[error("Invalid weight for {model_type}: {weight} (must be finite and >= 0)")]
    InvalidWeight { model_type: ModelType, weight: f64 },

    #[error("Invalid multiplier for risk profile {name}: {multiplier} (must be > 0)")]
    InvalidMultiplier { name: String, multiplier: f64 },

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

/// Errors raised by the numeric pipeline itself
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputationError {
    #[error("No recognized model type contributed any weight")]
    NoWeightedModels,

    #[error("Non-finite value produced during {stage}")]
    NonFinite { stage: String },
}

/// Any failure inside the engine, before it is wrapped at the orchestrator boundary
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Computation(#[from] ComputationError),

    #[error("Collaborator failure: {0}")]
    Collaborator(#[from] anyhow::Error),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Computation(_) => "computation",
            Self::Collaborator(_) => "collaborator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Prediction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Error,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PREDICTION")
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR")
    }
}

/// The single error shape surfaced by the prediction entry points.
///
/// Whatever step failed, callers receive the original cause together with
/// the context they passed in.
#[derive(Debug, Error)]
#[error("[{category}/{severity}] prediction failed during {stage}: {source}")]
pub struct PredictionError {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub stage: String,
    #[source]
    pub source: EngineError,
    pub context: PredictionContext,
}

impl PredictionError {
    pub fn new(stage: impl Into<String>, source: EngineError, context: PredictionContext) -> Self {
        Self {
            category: ErrorCategory::Prediction,
            severity: ErrorSeverity::Error,
            stage: stage.into(),
            source,
            context,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.source, EngineError::Validation(_))
    }

    pub fn is_computation(&self) -> bool {
        matches!(self.source, EngineError::Computation(_))
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match &self.source {
            EngineError::Validation(e) => Some(e),
            _ => None,
        }
    }
}
