//! Prometheus metrics definitions for the prediction engine
//!
//! All metrics use the `sureodds_` prefix and are read-only.

use crate::domain::ports::{MetricAttributes, MetricsSink};
use prometheus::{
    CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use serde_json::Value;
use std::sync::Arc;

/// Prometheus metrics for prediction requests
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Predictions generated by risk level and sure-odds flag
    pub predictions_total: CounterVec,
    /// Failed predictions by stage and error kind
    pub prediction_failures_total: CounterVec,
    /// Models dropped from a fan-out, by model and reason
    pub model_omissions_total: CounterVec,
    /// Weight / profile updates by target
    pub config_updates_total: CounterVec,
    /// End-to-end processing time in seconds
    pub processing_seconds: HistogramVec,
    /// Most recent final score
    pub last_final_score: GenericGauge<AtomicF64>,
    /// Most recent prediction confidence
    pub last_confidence: GenericGauge<AtomicF64>,
    /// Version of the last published weight / profile snapshot
    pub config_version: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let predictions_total = CounterVec::new(
            Opts::new(
                "sureodds_predictions_total",
                "Predictions generated by risk level",
            ),
            &["risk_level", "sure_odds"],
        )?;
        registry.register(Box::new(predictions_total.clone()))?;

        let prediction_failures_total = CounterVec::new(
            Opts::new(
                "sureodds_prediction_failures_total",
                "Failed predictions by stage and error kind",
            ),
            &["stage", "kind"],
        )?;
        registry.register(Box::new(prediction_failures_total.clone()))?;

        let model_omissions_total = CounterVec::new(
            Opts::new(
                "sureodds_model_omissions_total",
                "Models dropped from an ensemble fan-out",
            ),
            &["model", "reason"],
        )?;
        registry.register(Box::new(model_omissions_total.clone()))?;

        let config_updates_total = CounterVec::new(
            Opts::new(
                "sureodds_config_updates_total",
                "Published weight and risk profile updates",
            ),
            &["target"],
        )?;
        registry.register(Box::new(config_updates_total.clone()))?;

        let processing_seconds = HistogramVec::new(
            HistogramOpts::new(
                "sureodds_processing_seconds",
                "Prediction processing time in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0, 2.5,
            ]),
            &["operation"],
        )?;
        registry.register(Box::new(processing_seconds.clone()))?;

        let last_final_score = Gauge::with_opts(Opts::new(
            "sureodds_last_final_score",
            "Final score of the most recent prediction",
        ))?;
        registry.register(Box::new(last_final_score.clone()))?;

        let last_confidence = Gauge::with_opts(Opts::new(
            "sureodds_last_confidence",
            "Confidence of the most recent prediction (0-1)",
        ))?;
        registry.register(Box::new(last_confidence.clone()))?;

        let config_version = Gauge::with_opts(Opts::new(
            "sureodds_config_version",
            "Version of the active weight / profile snapshot",
        ))?;
        registry.register(Box::new(config_version.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            predictions_total,
            prediction_failures_total,
            model_omissions_total,
            config_updates_total,
            processing_seconds,
            last_final_score,
            last_confidence,
            config_version,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    fn observe_ms(&self, operation: &str, attrs: &MetricAttributes) {
        if let Some(ms) = number(attrs, "processing_time_ms") {
            self.processing_seconds
                .with_label_values(&[operation])
                .observe(ms / 1000.0);
        }
    }

    fn set_config_version(&self, attrs: &MetricAttributes) {
        if let Some(version) = number(attrs, "config_version") {
            self.config_version.set(version);
        }
    }
}

fn label(attrs: &MetricAttributes, key: &str) -> String {
    match attrs.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    }
}

fn number(attrs: &MetricAttributes, key: &str) -> Option<f64> {
    attrs.get(key).and_then(Value::as_f64)
}

impl MetricsSink for Metrics {
    fn track(&self, event: &str, attrs: &MetricAttributes) {
        match event {
            "prediction_generated" => {
                let risk_level = label(attrs, "risk_level");
                let sure_odds = label(attrs, "is_sure_odds");
                self.predictions_total
                    .with_label_values(&[risk_level.as_str(), sure_odds.as_str()])
                    .inc();
                if let Some(score) = number(attrs, "final_score") {
                    self.last_final_score.set(score);
                }
                if let Some(confidence) = number(attrs, "confidence") {
                    self.last_confidence.set(confidence);
                }
                self.observe_ms("predict", attrs);
                self.set_config_version(attrs);
            }
            "explanation_generated" => self.observe_ms("explain", attrs),
            "prediction_failed" => {
                let stage = label(attrs, "stage");
                let kind = label(attrs, "kind");
                self.prediction_failures_total
                    .with_label_values(&[stage.as_str(), kind.as_str()])
                    .inc();
            }
            "model_omitted" => {
                let model = label(attrs, "model");
                let reason = label(attrs, "reason");
                self.model_omissions_total
                    .with_label_values(&[model.as_str(), reason.as_str()])
                    .inc();
            }
            "model_weights_updated" | "risk_profiles_updated" => {
                let target = event.trim_end_matches("_updated");
                self.config_updates_total.with_label_values(&[target]).inc();
                self.set_config_version(attrs);
            }
            _ => {}
        }
    }
}
