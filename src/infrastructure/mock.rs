use crate::application::ensemble::engine::EngineServices;
use crate::domain::ports::{
    MetricAttributes, MetricsSink, ModelMetrics, ModelMetricsProvider, ModelRunner,
};
use crate::domain::prediction::types::{FeatureMap, ModelScore, ModelType};
use crate::infrastructure::config_store::InMemoryConfigStore;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Deterministic stand-in for the real models.
///
/// Score is the mean of the finite feature values clamped to [0, 1], shifted by
/// a fixed per-model bias. Confidence grows with the number of features.
pub struct SimulatedModelRunner {
    latencies: HashMap<ModelType, Duration>,
    failures: HashMap<ModelType, String>,
    noise: Option<(f64, Mutex<StdRng>)>,
}

impl SimulatedModelRunner {
    pub fn new() -> Self {
        Self {
            latencies: HashMap::new(),
            failures: HashMap::new(),
            noise: None,
        }
    }

    pub fn with_latency(mut self, model: ModelType, latency: Duration) -> Self {
        self.latencies.insert(model, latency);
        self
    }

    pub fn with_failure(mut self, model: ModelType, message: &str) -> Self {
        self.failures.insert(model, message.to_string());
        self
    }

    /// Add uniform noise in `[-amplitude, amplitude]` to every score
    pub fn with_noise(mut self, amplitude: f64, seed: u64) -> Self {
        self.noise = Some((amplitude.abs(), Mutex::new(StdRng::seed_from_u64(seed))));
        self
    }

    fn bias(model: ModelType) -> f64 {
        match model {
            ModelType::Historical => 0.05,
            ModelType::Market => 0.0,
            ModelType::Sentiment => -0.05,
            ModelType::Correlation => 0.02,
        }
    }

    fn score(&self, model: ModelType, features: &FeatureMap) -> ModelScore {
        let finite: Vec<f64> = features
            .values()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        let base = if finite.is_empty() {
            0.5
        } else {
            finite.iter().map(|v| v.clamp(0.0, 1.0)).sum::<f64>() / finite.len() as f64
        };

        let noise = match &self.noise {
            Some((amplitude, rng)) if *amplitude > 0.0 => {
                rng.lock().random_range(-*amplitude..=*amplitude)
            }
            _ => 0.0,
        };

        ModelScore {
            score: (base + Self::bias(model) + noise).clamp(0.0, 1.0),
            confidence: (0.6 + 0.05 * finite.len() as f64).min(0.95),
        }
    }
}

impl Default for SimulatedModelRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelRunner for SimulatedModelRunner {
    async fn run(&self, model: ModelType, features: &FeatureMap) -> Result<ModelScore> {
        if let Some(latency) = self.latencies.get(&model) {
            tokio::time::sleep(*latency).await;
        }
        if let Some(message) = self.failures.get(&model) {
            return Err(anyhow!("{} model unavailable: {}", model, message));
        }

        let score = self.score(model, features);
        debug!(
            "SimulatedModelRunner: {} -> {:.3} ({:.2})",
            model, score.score, score.confidence
        );
        Ok(score)
    }
}

/// Fixed feature-importance tables
#[derive(Debug, Clone, Default)]
pub struct StaticModelMetrics {
    tables: HashMap<ModelType, HashMap<String, f64>>,
}

impl StaticModelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_importance(mut self, model: ModelType, feature: &str, importance: f64) -> Self {
        self.tables
            .entry(model)
            .or_default()
            .insert(feature.to_string(), importance);
        self
    }

    /// Tables used by the CLI and tests
    pub fn simulated() -> Self {
        Self::new()
            .with_importance(ModelType::Historical, "form", 0.4)
            .with_importance(ModelType::Historical, "head_to_head", 0.3)
            .with_importance(ModelType::Historical, "home_advantage", 0.2)
            .with_importance(ModelType::Market, "odds_drift", 0.5)
            .with_importance(ModelType::Market, "volume", 0.3)
            .with_importance(ModelType::Sentiment, "sentiment", 0.6)
            .with_importance(ModelType::Sentiment, "news_volume", 0.2)
            .with_importance(ModelType::Correlation, "form", 0.2)
            .with_importance(ModelType::Correlation, "odds_drift", 0.2)
            .with_importance(ModelType::Correlation, "league_correlation", 0.4)
    }
}

impl ModelMetricsProvider for StaticModelMetrics {
    fn get_model_metrics(&self, model: ModelType) -> Result<ModelMetrics> {
        Ok(ModelMetrics {
            feature_importance: self.tables.get(&model).cloned().unwrap_or_default(),
        })
    }
}

/// Keeps every tracked event in memory
#[derive(Default)]
pub struct RecordingMetricsSink {
    events: Mutex<Vec<(String, MetricAttributes)>>,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, MetricAttributes)> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|(e, _)| e == event).count()
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn track(&self, event: &str, attrs: &MetricAttributes) {
        self.events.lock().push((event.to_string(), attrs.clone()));
    }
}

/// In-memory collaborators wired around the simulated runner
pub fn simulated_services() -> EngineServices {
    EngineServices {
        metrics: Arc::new(RecordingMetricsSink::new()),
        config_store: Arc::new(InMemoryConfigStore::new()),
        model_metrics: Arc::new(StaticModelMetrics::simulated()),
        model_runner: Arc::new(SimulatedModelRunner::new()),
    }
}
