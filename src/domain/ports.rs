use crate::domain::prediction::types::{FeatureMap, ModelScore, ModelType};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Attributes attached to a tracked metrics event
pub type MetricAttributes = BTreeMap<String, serde_json::Value>;

/// Sink for metrics events emitted by the engine
pub trait MetricsSink: Send + Sync {
    fn track(&self, event: &str, attrs: &MetricAttributes);
}

/// Key/value persistence for administrative configuration
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetrics {
    /// Relative importance per feature name
    pub feature_importance: HashMap<String, f64>,
}

/// Source of per-model feature importance tables
pub trait ModelMetricsProvider: Send + Sync {
    fn get_model_metrics(&self, model: ModelType) -> Result<ModelMetrics>;
}

/// Runs one model against a raw feature vector.
///
/// Retrying failed calls is the runner's job; the engine never retries.
#[async_trait]
pub trait ModelRunner: Send + Sync {
    async fn run(&self, model: ModelType, features: &FeatureMap) -> Result<ModelScore>;
}
