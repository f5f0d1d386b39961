use crate::domain::errors::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Raw feature values reported by a model, keyed by feature name.
///
/// The feature set is owned by the external model configuration, so names are
/// kept dynamic. Ordered so that iteration (and therefore tie-breaking) is
/// deterministic.
pub type FeatureMap = BTreeMap<String, f64>;

/// Source of an independent model output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelType {
    /// Long-run results of comparable events
    Historical,
    /// Price and odds movement
    Market,
    /// News and crowd mood
    Sentiment,
    /// Cross-event correlation
    Correlation,
}

impl ModelType {
    pub const ALL: [ModelType; 4] = [
        ModelType::Historical,
        ModelType::Market,
        ModelType::Sentiment,
        ModelType::Correlation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Historical => "historical",
            Self::Market => "market",
            Self::Sentiment => "sentiment",
            Self::Correlation => "correlation",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "historical" => Ok(Self::Historical),
            "market" => Ok(Self::Market),
            "sentiment" => Ok(Self::Sentiment),
            "correlation" => Ok(Self::Correlation),
            other => Err(ValidationError::UnknownModelType {
                name: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ModelType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelType> for String {
    fn from(value: ModelType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMetadata {
    pub signal_strength: f64,
    /// Model latency in milliseconds
    pub latency: u64,
}

/// One model's opinion for a single prediction call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOutput {
    #[serde(rename = "type")]
    pub model_type: ModelType,
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub features: FeatureMap,
    /// Unix milliseconds
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: OutputMetadata,
}

impl ModelOutput {
    pub fn new(model_type: ModelType, score: f64, confidence: f64) -> Self {
        Self {
            model_type,
            score,
            confidence,
            features: FeatureMap::new(),
            timestamp: Utc::now().timestamp_millis(),
            metadata: OutputMetadata::default(),
        }
    }

    pub fn with_feature(mut self, name: impl Into<String>, value: f64) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, signal_strength: f64, latency: u64) -> Self {
        self.metadata = OutputMetadata {
            signal_strength,
            latency,
        };
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelWeight {
    #[serde(rename = "type")]
    pub model_type: ModelType,
    pub weight: f64,
}

impl ModelWeight {
    pub fn new(model_type: ModelType, weight: f64) -> Self {
        Self { model_type, weight }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskProfile {
    #[serde(rename = "type")]
    pub name: String,
    pub multiplier: f64,
}

impl RiskProfile {
    pub fn new(name: impl Into<String>, multiplier: f64) -> Self {
        Self {
            name: name.into(),
            multiplier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRange {
    pub min: f64,
    pub max: f64,
    pub expected: f64,
}

impl PayoutRange {
    pub fn is_ordered(&self) -> bool {
        self.min <= self.expected && self.expected <= self.max
    }
}

/// Span of input timestamps (Unix ms) the prediction was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceWindow {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelContribution {
    pub weight: f64,
    pub confidence: f64,
    pub score: f64,
}

/// A feature's merged contribution across several model outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureImpact {
    pub name: String,
    pub weight: f64,
    pub impact: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub fn of(value: f64) -> Self {
        if value > 0.0 {
            Self::Positive
        } else {
            Self::Negative
        }
    }

    /// Direction implied by a scalar prediction in [0, 1]
    pub fn of_prediction(prediction: f64) -> Self {
        if prediction > 0.5 {
            Self::Positive
        } else {
            Self::Negative
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapValue {
    pub feature: String,
    pub value: f64,
    pub impact: f64,
    pub direction: Direction,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapExplanation {
    pub model: ModelType,
    pub base_value: f64,
    pub values: Vec<ShapValue>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionMetadata {
    /// Milliseconds spent inside the engine
    pub processing_time: f64,
    pub data_freshness: f64,
    pub signal_quality: f64,
    pub decision_path: Vec<String>,
    /// Version of the weight/profile snapshot the prediction was computed from
    pub config_version: u64,
}

/// The engine's output artifact. Once returned it is a plain value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalPrediction {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub risk_profile: String,
    pub final_score: f64,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub is_sure_odds: bool,
    pub payout_range: PayoutRange,
    pub confidence_window: ConfidenceWindow,
    pub model_contributions: BTreeMap<ModelType, ModelContribution>,
    pub top_features: Vec<FeatureImpact>,
    pub supporting_features: Vec<FeatureImpact>,
    pub metadata: PredictionMetadata,
}

/// Scalar result of folding several model outputs together
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedPrediction {
    pub prediction: f64,
    pub confidence: f64,
}

/// What a model runner returns for one feature vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelScore {
    pub score: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OmissionReason {
    TimedOut { after_ms: u64 },
    DeadlineExceeded,
    Failed { message: String },
}

impl OmissionReason {
    /// Stable label for the reason, without the timeout or failure message
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TimedOut { .. } => "timed_out",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for OmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut { after_ms } => write!(f, "timed out after {}ms", after_ms),
            Self::DeadlineExceeded => write!(f, "caller deadline exceeded"),
            Self::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

/// A model dropped from a fan-out call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOmission {
    pub model: ModelType,
    pub reason: OmissionReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFanOut {
    pub outputs: BTreeMap<ModelType, ModelOutput>,
    pub omitted: Vec<ModelOmission>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainedPrediction {
    pub prediction: f64,
    pub confidence: f64,
    pub risk_profile: String,
    pub risk_level: RiskLevel,
    pub is_sure_odds: bool,
    pub explanations: BTreeMap<ModelType, ShapExplanation>,
    pub omitted_models: Vec<ModelOmission>,
    pub decision_path: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMetrics {
    pub model_count: usize,
    pub risk_profile_count: usize,
    pub sure_odds_threshold: f64,
    pub feature_threshold: f64,
}

/// Caller-supplied context carried into logs and errors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionContext {
    pub request_id: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl PredictionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
