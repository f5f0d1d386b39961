//! Prediction orchestrator.
//!
//! Public entry point of the engine. A call loads one configuration
//! snapshot, walks the stages in order (validate, combine, classify,
//! attribute, assemble) and either returns an immutable `FinalPrediction` or
//! a single wrapped `PredictionError`.

use super::attribution::{ShapCalculator, aggregate_features};
use super::combiner::{CombinedScore, EnsembleCombiner};
use super::confidence::ConfidenceSynthesizer;
use super::fan_out::fan_out;
use super::risk_classifier::{RiskAssessment, RiskClassifier};
use super::snapshot::{EngineSnapshot, SnapshotCell};
use super::stage::{PredictionRun, PredictionStage};
use crate::config::EngineConfig;
use crate::domain::errors::{EngineError, PredictionError, ValidationError};
use crate::domain::ports::{
    ConfigStore, MetricAttributes, MetricsSink, ModelMetricsProvider, ModelRunner,
};
use crate::domain::prediction::feature_stats::FeatureStatistics;
use crate::domain::prediction::types::{
    CombinedPrediction, ConfidenceWindow, EngineMetrics, ExplainedPrediction, FeatureImpact,
    FeatureMap, FinalPrediction, ModelFanOut, ModelOutput, ModelType, ModelWeight, PredictionContext,
    PredictionMetadata, RiskProfile, ShapExplanation,
};
use anyhow::Context;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const MODEL_WEIGHTS_KEY: &str = "model_weights";
pub const RISK_PROFILES_KEY: &str = "risk_profiles";

/// Collaborators the engine depends on
#[derive(Clone)]
pub struct EngineServices {
    pub metrics: Arc<dyn MetricsSink>,
    pub config_store: Arc<dyn ConfigStore>,
    pub model_metrics: Arc<dyn ModelMetricsProvider>,
    pub model_runner: Arc<dyn ModelRunner>,
}

pub struct PredictionEngine {
    config: EngineConfig,
    snapshots: SnapshotCell,
    feature_stats: FeatureStatistics,
    classifier: RiskClassifier,
    synthesizer: ConfidenceSynthesizer,
    services: EngineServices,
}

fn attrs<const N: usize>(pairs: [(&str, Value); N]) -> MetricAttributes {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl PredictionEngine {
    /// Build the engine from `config`, restoring any weights / profiles
    /// previously persisted in the config store.
    pub fn new(config: EngineConfig, services: EngineServices) -> Result<Self, EngineError> {
        config.validate()?;

        let mut snapshot = EngineSnapshot::from_config(&config);
        Self::restore_persisted(&mut snapshot, services.config_store.as_ref());

        info!(
            "PredictionEngine: {} model weights, {} risk profiles (sure-odds >= {})",
            snapshot.model_weights.len(),
            snapshot.risk_profiles.len(),
            config.sure_odds_threshold
        );

        Ok(Self {
            classifier: RiskClassifier::new(
                config.risk_thresholds,
                config.sure_odds_threshold,
                config.payout_band,
            ),
            synthesizer: ConfidenceSynthesizer::new(config.confidence_weights),
            snapshots: SnapshotCell::new(snapshot),
            feature_stats: FeatureStatistics::new(),
            config,
            services,
        })
    }

    fn restore_persisted(snapshot: &mut EngineSnapshot, store: &dyn ConfigStore) {
        match store.get(MODEL_WEIGHTS_KEY) {
            Ok(Some(value)) => {
                match serde_json::from_value::<BTreeMap<ModelType, f64>>(value) {
                    Ok(weights) if weights.values().all(|w| w.is_finite() && *w >= 0.0) => {
                        info!("Restored {} persisted model weights", weights.len());
                        snapshot.model_weights = weights;
                    }
                    Ok(_) => warn!("Ignoring persisted model weights: invalid values"),
                    Err(e) => warn!("Ignoring persisted model weights: {}", e),
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to read persisted model weights: {:#}", e),
        }

        match store.get(RISK_PROFILES_KEY) {
            Ok(Some(value)) => match serde_json::from_value::<BTreeMap<String, f64>>(value) {
                Ok(profiles) if profiles.values().all(|m| m.is_finite() && *m > 0.0) => {
                    info!("Restored {} persisted risk profiles", profiles.len());
                    snapshot.risk_profiles = EngineSnapshot::profiles_from_multipliers(&profiles);
                }
                Ok(_) => warn!("Ignoring persisted risk profiles: invalid multipliers"),
                Err(e) => warn!("Ignoring persisted risk profiles: {}", e),
            },
            Ok(None) => {}
            Err(e) => warn!("Failed to read persisted risk profiles: {:#}", e),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn feature_statistics(&self) -> &FeatureStatistics {
        &self.feature_stats
    }

    /// Current weight / profile snapshot
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.snapshots.load()
    }

    /// Combine model outputs into one `FinalPrediction` for the named risk profile.
    pub fn generate_prediction(
        &self,
        outputs: &[ModelOutput],
        risk_profile: &str,
        context: PredictionContext,
    ) -> Result<FinalPrediction, PredictionError> {
        let snapshot = self.snapshots.load();
        let mut run = PredictionRun::new(context);

        match self.run_stages(&mut run, &snapshot, outputs, risk_profile) {
            Ok(prediction) => {
                run.advance(PredictionStage::Done);
                info!(
                    "Prediction {}: score {:.3}, confidence {:.3}, risk {}, sure odds {} ({:.2}ms)",
                    prediction.id,
                    prediction.final_score,
                    prediction.confidence,
                    prediction.risk_level,
                    prediction.is_sure_odds,
                    prediction.metadata.processing_time
                );
                self.services.metrics.track(
                    "prediction_generated",
                    &attrs([
                        ("risk_level", json!(prediction.risk_level)),
                        ("risk_profile", json!(prediction.risk_profile)),
                        ("final_score", json!(prediction.final_score)),
                        ("confidence", json!(prediction.confidence)),
                        ("is_sure_odds", json!(prediction.is_sure_odds)),
                        ("processing_time_ms", json!(prediction.metadata.processing_time)),
                        ("config_version", json!(prediction.metadata.config_version)),
                    ]),
                );
                Ok(prediction)
            }
            Err(source) => Err(self.fail(&mut run, source)),
        }
    }

    fn fail(&self, run: &mut PredictionRun, source: EngineError) -> PredictionError {
        let kind = source.kind();
        let err = run.fail(source);
        error!("{} (context: {:?})", err, err.context);
        self.services.metrics.track(
            "prediction_failed",
            &attrs([
                ("stage", json!(err.stage)),
                ("kind", json!(kind)),
                ("error", json!(err.source.to_string())),
            ]),
        );
        err
    }

    fn run_stages(
        &self,
        run: &mut PredictionRun,
        snapshot: &EngineSnapshot,
        outputs: &[ModelOutput],
        risk_profile: &str,
    ) -> Result<FinalPrediction, EngineError> {
        run.advance(PredictionStage::Validating);
        Self::validate_outputs(outputs)?;
        let profile = snapshot.risk_profile(risk_profile)?;
        run.record(format!(
            "validated {} model outputs for risk profile '{}'",
            outputs.len(),
            profile.name
        ));

        run.advance(PredictionStage::Combining);
        let combined = EnsembleCombiner::combine(outputs, &snapshot.model_weights)?;
        for skipped in &combined.skipped {
            run.record(format!("skipped {} output: no weight configured", skipped));
        }
        run.record(format!(
            "combined {} models (total weight {:.2}): score {:.3}, confidence {:.3}",
            combined.contributing_models(),
            combined.total_weight,
            combined.weighted_score,
            combined.average_confidence
        ));

        run.advance(PredictionStage::Classifying);
        let assessment = self.classifier.classify(&combined, profile);
        run.record(format!(
            "classified risk score {:.3} as {} (x{:.2} multiplier)",
            assessment.risk_score, assessment.risk_level, profile.multiplier
        ));
        if assessment.is_sure_odds {
            run.record(format!(
                "confidence {:.3} meets sure-odds threshold {:.2}",
                combined.average_confidence, self.config.sure_odds_threshold
            ));
        }

        run.advance(PredictionStage::Attributing);
        let ranked = aggregate_features(
            outputs,
            self.config.max_features,
            self.config.feature_threshold,
        );
        run.record(format!(
            "attributed {} features ({} top, {} supporting)",
            ranked.len(),
            ranked.top.len(),
            ranked.supporting.len()
        ));

        run.advance(PredictionStage::Assembling);
        run.record("assembled final prediction");
        Ok(self.assemble(
            run,
            snapshot,
            outputs,
            profile,
            &combined,
            &assessment,
            ranked.top,
            ranked.supporting,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        run: &PredictionRun,
        snapshot: &EngineSnapshot,
        outputs: &[ModelOutput],
        profile: &RiskProfile,
        combined: &CombinedScore,
        assessment: &RiskAssessment,
        top_features: Vec<FeatureImpact>,
        supporting_features: Vec<FeatureImpact>,
    ) -> FinalPrediction {
        let now = Utc::now();
        let confidence_window = ConfidenceWindow {
            start: outputs.iter().map(|o| o.timestamp).min().unwrap_or(0),
            end: outputs.iter().map(|o| o.timestamp).max().unwrap_or(0),
        };

        FinalPrediction {
            id: Uuid::new_v4(),
            timestamp: now,
            risk_profile: profile.name.clone(),
            final_score: assessment.final_score,
            confidence: combined.average_confidence,
            risk_level: assessment.risk_level,
            is_sure_odds: assessment.is_sure_odds,
            payout_range: assessment.payout_range,
            confidence_window,
            model_contributions: combined.contributions.clone(),
            top_features,
            supporting_features,
            metadata: PredictionMetadata {
                processing_time: run.elapsed_ms(),
                data_freshness: self.data_freshness(outputs, now.timestamp_millis()),
                signal_quality: Self::signal_quality(outputs, &snapshot.model_weights),
                decision_path: run.decision_path().to_vec(),
                config_version: snapshot.version,
            },
        }
    }

    fn validate_outputs(outputs: &[ModelOutput]) -> Result<(), ValidationError> {
        if outputs.is_empty() {
            return Err(ValidationError::EmptyOutputs);
        }

        let mut seen = HashSet::new();
        for output in outputs {
            if !seen.insert(output.model_type) {
                return Err(ValidationError::DuplicateModelType {
                    model_type: output.model_type,
                });
            }
            for (field, value) in [("score", output.score), ("confidence", output.confidence)] {
                if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                    return Err(ValidationError::OutOfRange {
                        field: format!("{}.{}", output.model_type, field),
                        value,
                    });
                }
            }
        }
        Ok(())
    }

    /// Mean of per-output freshness, decaying linearly to zero at the horizon
    fn data_freshness(&self, outputs: &[ModelOutput], now_ms: i64) -> f64 {
        let horizon = self.config.freshness_horizon_ms.max(1) as f64;
        let total: f64 = outputs
            .iter()
            .map(|o| {
                let age = now_ms.saturating_sub(o.timestamp).max(0) as f64;
                (1.0 - age / horizon).clamp(0.0, 1.0)
            })
            .sum();
        total / outputs.len() as f64
    }

    /// Weight-averaged signal strength of the weighted outputs
    fn signal_quality(outputs: &[ModelOutput], weights: &BTreeMap<ModelType, f64>) -> f64 {
        let (sum, total) = outputs
            .iter()
            .filter_map(|o| weights.get(&o.model_type).map(|w| (o, *w)))
            .fold((0.0, 0.0), |(sum, total), (o, w)| {
                (sum + o.metadata.signal_strength * w, total + w)
            });
        if total > 0.0 { sum / total } else { 0.0 }
    }

    /// Merge `weights` into the current weight map, persist it, then publish it.
    pub fn update_model_weights(&self, weights: &[ModelWeight]) -> Result<(), EngineError> {
        if weights.is_empty() {
            return Err(ValidationError::InvalidConfiguration {
                reason: "no model weights supplied".to_string(),
            }
            .into());
        }
        for w in weights {
            if !w.weight.is_finite() || w.weight < 0.0 {
                return Err(ValidationError::InvalidWeight {
                    model_type: w.model_type,
                    weight: w.weight,
                }
                .into());
            }
        }

        let store = self.services.config_store.clone();
        let published = self.snapshots.update(|current| -> Result<_, EngineError> {
            let mut next = current.clone();
            for w in weights {
                next.model_weights.insert(w.model_type, w.weight);
            }
            let value = serde_json::to_value(&next.model_weights)
                .context("Failed to serialize model weights")?;
            store
                .set(MODEL_WEIGHTS_KEY, value)
                .context("Failed to persist model weights")?;
            Ok(next)
        })?;

        info!(
            "Model weights updated (config v{}): {:?}",
            published.version, published.model_weights
        );
        self.services.metrics.track(
            "model_weights_updated",
            &attrs([
                ("config_version", json!(published.version)),
                ("model_count", json!(published.model_weights.len())),
            ]),
        );
        Ok(())
    }

    /// Merge `profiles` into the current risk profiles, persist them, then publish them.
    pub fn update_risk_profiles(&self, profiles: &[RiskProfile]) -> Result<(), EngineError> {
        if profiles.is_empty() {
            return Err(ValidationError::InvalidConfiguration {
                reason: "no risk profiles supplied".to_string(),
            }
            .into());
        }
        for p in profiles {
            if !p.multiplier.is_finite() || p.multiplier <= 0.0 {
                return Err(ValidationError::InvalidMultiplier {
                    name: p.name.clone(),
                    multiplier: p.multiplier,
                }
                .into());
            }
        }

        let store = self.services.config_store.clone();
        let published = self.snapshots.update(|current| -> Result<_, EngineError> {
            let mut next = current.clone();
            for p in profiles {
                next.risk_profiles.insert(p.name.clone(), p.clone());
            }
            let value = serde_json::to_value(next.risk_multipliers())
                .context("Failed to serialize risk profiles")?;
            store
                .set(RISK_PROFILES_KEY, value)
                .context("Failed to persist risk profiles")?;
            Ok(next)
        })?;

        info!(
            "Risk profiles updated (config v{}): {:?}",
            published.version,
            published.risk_profiles.keys().collect::<Vec<_>>()
        );
        self.services.metrics.track(
            "risk_profiles_updated",
            &attrs([
                ("config_version", json!(published.version)),
                ("profile_count", json!(published.risk_profiles.len())),
            ]),
        );
        Ok(())
    }

    pub fn get_engine_metrics(&self) -> EngineMetrics {
        let snapshot = self.snapshots.load();
        EngineMetrics {
            model_count: snapshot.model_weights.len(),
            risk_profile_count: snapshot.risk_profiles.len(),
            sure_odds_threshold: self.config.sure_odds_threshold,
            feature_threshold: self.config.feature_threshold,
        }
    }

    /// Post-hoc sanity audit. Never fails; violations are logged and yield `false`.
    pub fn validate_prediction(&self, prediction: &FinalPrediction) -> bool {
        let violations = Self::prediction_violations(prediction);
        if violations.is_empty() {
            return true;
        }
        error!(
            "Prediction {} failed validation: {}",
            prediction.id,
            violations.join("; ")
        );
        false
    }

    /// Same audit for a serialized prediction, e.g. one read back before broadcasting.
    /// Missing fields or an unrecognized risk level fail deserialization.
    pub fn validate_prediction_json(&self, value: &Value) -> bool {
        match serde_json::from_value::<FinalPrediction>(value.clone()) {
            Ok(prediction) => self.validate_prediction(&prediction),
            Err(e) => {
                error!("Prediction failed validation: {}", e);
                false
            }
        }
    }

    fn prediction_violations(p: &FinalPrediction) -> Vec<String> {
        let mut violations = Vec::new();

        let numbers = [
            ("finalScore", p.final_score),
            ("confidence", p.confidence),
            ("payoutRange.min", p.payout_range.min),
            ("payoutRange.expected", p.payout_range.expected),
            ("payoutRange.max", p.payout_range.max),
            ("metadata.processingTime", p.metadata.processing_time),
            ("metadata.dataFreshness", p.metadata.data_freshness),
            ("metadata.signalQuality", p.metadata.signal_quality),
        ];
        for (field, value) in numbers {
            if !value.is_finite() {
                violations.push(format!("{} is not finite", field));
            }
        }
        if !(0.0..=1.0).contains(&p.confidence) {
            violations.push(format!("confidence {} outside [0, 1]", p.confidence));
        }
        if !(0.0..=1.0).contains(&p.metadata.data_freshness) {
            violations.push(format!(
                "dataFreshness {} outside [0, 1]",
                p.metadata.data_freshness
            ));
        }
        if !p.payout_range.is_ordered() {
            violations.push(format!(
                "payoutRange not ordered: min {} expected {} max {}",
                p.payout_range.min, p.payout_range.expected, p.payout_range.max
            ));
        }
        if p.confidence_window.start > p.confidence_window.end {
            violations.push(format!(
                "confidenceWindow start {} after end {}",
                p.confidence_window.start, p.confidence_window.end
            ));
        }
        if p.risk_profile.is_empty() {
            violations.push("riskProfile missing".to_string());
        }
        if p.model_contributions.is_empty() {
            violations.push("modelContributions missing".to_string());
        }
        if p.metadata.decision_path.is_empty() {
            violations.push("decisionPath missing".to_string());
        }
        let top: BTreeSet<&str> = p.top_features.iter().map(|f| f.name.as_str()).collect();
        if p
            .supporting_features
            .iter()
            .any(|f| top.contains(f.name.as_str()))
        {
            violations.push("topFeatures and supportingFeatures overlap".to_string());
        }

        violations
    }

    /// Feed raw feature values into the normalization statistics.
    pub fn observe_features(&self, features: &FeatureMap) {
        for (name, value) in features {
            self.feature_stats.observe(name, *value);
        }
    }

    /// SHAP-style explanation of one model's prediction.
    pub fn calculate_shap_values(
        &self,
        model: ModelType,
        features: &FeatureMap,
        prediction: f64,
    ) -> Result<ShapExplanation, EngineError> {
        let metrics = self
            .services
            .model_metrics
            .get_model_metrics(model)
            .with_context(|| format!("Failed to load feature importance for {}", model))?;

        let calculator = ShapCalculator::new(&self.feature_stats, self.synthesizer);
        Ok(calculator.explain(model, features, &metrics.feature_importance, prediction))
    }

    /// Run every configured model against `features`.
    pub async fn generate_predictions(&self, features: &FeatureMap) -> ModelFanOut {
        self.generate_predictions_within(features, None).await
    }

    /// As `generate_predictions`, dropping any model still running after `deadline`.
    pub async fn generate_predictions_within(
        &self,
        features: &FeatureMap,
        deadline: Option<Duration>,
    ) -> ModelFanOut {
        let snapshot = self.snapshots.load();
        self.fan_out_with(&snapshot, features, deadline).await
    }

    async fn fan_out_with(
        &self,
        snapshot: &EngineSnapshot,
        features: &FeatureMap,
        deadline: Option<Duration>,
    ) -> ModelFanOut {
        let models: Vec<ModelType> = snapshot.model_weights.keys().copied().collect();
        let result = fan_out(
            self.services.model_runner.as_ref(),
            &models,
            features,
            &self.config.fan_out,
            deadline,
        )
        .await;

        for omission in &result.omitted {
            self.services.metrics.track(
                "model_omitted",
                &attrs([
                    ("model", json!(omission.model)),
                    ("reason", json!(omission.reason.kind())),
                ]),
            );
        }
        result
    }

    /// Fold per-model outputs into one weight-normalized prediction.
    pub fn combine_predictions(
        &self,
        predictions: &BTreeMap<ModelType, ModelOutput>,
    ) -> Result<CombinedPrediction, EngineError> {
        let snapshot = self.snapshots.load();
        let combined = EnsembleCombiner::combine(predictions.values(), &snapshot.model_weights)?;
        Ok(CombinedPrediction {
            prediction: combined.weighted_score,
            confidence: combined.average_confidence,
        })
    }

    /// Fan out over all models, explain each one and fold the results.
    pub async fn generate_prediction_with_explanation(
        &self,
        features: &FeatureMap,
        risk_profile: &str,
    ) -> Result<ExplainedPrediction, PredictionError> {
        self.generate_prediction_with_explanation_within(
            features,
            risk_profile,
            None,
            PredictionContext::new(),
        )
        .await
    }

    pub async fn generate_prediction_with_explanation_within(
        &self,
        features: &FeatureMap,
        risk_profile: &str,
        deadline: Option<Duration>,
        context: PredictionContext,
    ) -> Result<ExplainedPrediction, PredictionError> {
        let snapshot = self.snapshots.load();
        let mut run = PredictionRun::new(context);

        run.advance(PredictionStage::Validating);
        let profile = match snapshot.risk_profile(risk_profile) {
            Ok(profile) => profile.clone(),
            Err(e) => return Err(self.fail(&mut run, e.into())),
        };
        run.record(format!(
            "validated {} features for risk profile '{}'",
            features.len(),
            profile.name
        ));

        run.advance(PredictionStage::Combining);
        let fanned = self.fan_out_with(&snapshot, features, deadline).await;
        for omission in &fanned.omitted {
            run.record(format!("omitted {}: {}", omission.model, omission.reason));
        }
        let combined = match EnsembleCombiner::combine(fanned.outputs.values(), &snapshot.model_weights)
        {
            Ok(combined) => combined,
            Err(e) => return Err(self.fail(&mut run, e.into())),
        };
        run.record(format!(
            "combined {} of {} models: prediction {:.3}",
            fanned.outputs.len(),
            snapshot.model_weights.len(),
            combined.weighted_score
        ));

        run.advance(PredictionStage::Classifying);
        let assessment = self.classifier.classify(&combined, &profile);
        run.record(format!(
            "classified risk score {:.3} as {}",
            assessment.risk_score, assessment.risk_level
        ));

        run.advance(PredictionStage::Attributing);
        let mut explanations = BTreeMap::new();
        for (model, output) in &fanned.outputs {
            match self.calculate_shap_values(*model, &output.features, output.score) {
                Ok(explanation) => {
                    explanations.insert(*model, explanation);
                }
                Err(e) => return Err(self.fail(&mut run, e)),
            }
        }
        let confidence = self.synthesizer.synthesize(
            explanations.values().flat_map(|e| e.values.iter()),
            combined.weighted_score,
        );
        run.record(format!(
            "explained {} models, explanation confidence {:.3}",
            explanations.len(),
            confidence
        ));

        run.advance(PredictionStage::Assembling);
        run.record("assembled explained prediction");
        let result = ExplainedPrediction {
            prediction: combined.weighted_score,
            confidence,
            risk_profile: profile.name.clone(),
            risk_level: assessment.risk_level,
            is_sure_odds: assessment.is_sure_odds,
            explanations,
            omitted_models: fanned.omitted,
            decision_path: run.decision_path().to_vec(),
            timestamp: Utc::now(),
        };
        run.advance(PredictionStage::Done);

        info!(
            "Explained prediction {:.3} (confidence {:.3}, {} models, {} omitted)",
            result.prediction,
            result.confidence,
            result.explanations.len(),
            result.omitted_models.len()
        );
        self.services.metrics.track(
            "explanation_generated",
            &attrs([
                ("prediction", json!(result.prediction)),
                ("confidence", json!(result.confidence)),
                ("risk_level", json!(result.risk_level)),
                ("models", json!(result.explanations.len())),
                ("omitted", json!(result.omitted_models.len())),
                ("processing_time_ms", json!(run.elapsed_ms())),
            ]),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prediction::feature_stats::FeatureStats;
    use crate::domain::prediction::types::RiskLevel;
    use crate::infrastructure::mock::{RecordingMetricsSink, simulated_services};

    fn engine_with(weights: &[(ModelType, f64)]) -> (PredictionEngine, Arc<RecordingMetricsSink>) {
        let config = EngineConfig {
            model_weights: weights.iter().copied().collect(),
            ..EngineConfig::default()
        };
        let sink = Arc::new(RecordingMetricsSink::new());
        let mut services = simulated_services();
        services.metrics = sink.clone();
        (PredictionEngine::new(config, services).unwrap(), sink)
    }

    fn reference_outputs() -> Vec<ModelOutput> {
        vec![
            ModelOutput::new(ModelType::Historical, 0.8, 0.9)
                .with_feature("form", 0.7)
                .with_metadata(0.8, 10),
            ModelOutput::new(ModelType::Market, 0.6, 0.7)
                .with_feature("odds_drift", -0.4)
                .with_metadata(0.4, 20),
        ]
    }

    #[test]
    fn test_reference_scenario() {
        let (engine, sink) =
            engine_with(&[(ModelType::Historical, 0.6), (ModelType::Market, 0.4)]);

        let prediction = engine
            .generate_prediction(&reference_outputs(), "moderate", PredictionContext::new())
            .unwrap();

        assert!((prediction.final_score - 0.5904).abs() < 1e-9);
        assert!((prediction.confidence - 0.82).abs() < 1e-9);
        assert_eq!(prediction.risk_level, RiskLevel::Low);
        assert!(!prediction.is_sure_odds);
        assert!(prediction.payout_range.is_ordered());
        assert_eq!(prediction.model_contributions.len(), ModelType::ALL.len());
        assert_eq!(prediction.top_features[0].name, "form");
        // 0.8 * 0.6 + 0.4 * 0.4
        assert!((prediction.metadata.signal_quality - 0.64).abs() < 1e-9);
        assert!(prediction.metadata.data_freshness > 0.9);
        assert_eq!(prediction.metadata.decision_path.len(), 5);
        assert!(engine.validate_prediction(&prediction));
        assert_eq!(sink.count("prediction_generated"), 1);
    }

    #[test]
    fn test_empty_outputs_rejected() {
        let (engine, sink) = engine_with(&[(ModelType::Historical, 1.0)]);
        let err = engine
            .generate_prediction(&[], "moderate", PredictionContext::new().with_request_id("r1"))
            .unwrap_err();

        assert_eq!(err.validation(), Some(&ValidationError::EmptyOutputs));
        assert_eq!(err.stage, "Validating");
        assert_eq!(err.context.request_id.as_deref(), Some("r1"));
        assert_eq!(sink.count("prediction_failed"), 1);
        assert_eq!(sink.count("prediction_generated"), 0);
    }

    #[test]
    fn test_duplicate_model_type_rejected() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 1.0)]);
        let outputs = vec![
            ModelOutput::new(ModelType::Historical, 0.5, 0.5),
            ModelOutput::new(ModelType::Historical, 0.6, 0.6),
        ];

        let err = engine
            .generate_prediction(&outputs, "moderate", PredictionContext::new())
            .unwrap_err();
        assert_eq!(
            err.validation(),
            Some(&ValidationError::DuplicateModelType {
                model_type: ModelType::Historical
            })
        );
    }

    #[test]
    fn test_unknown_risk_profile_rejected() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 1.0)]);
        let err = engine
            .generate_prediction(&reference_outputs(), "yolo", PredictionContext::new())
            .unwrap_err();
        assert!(matches!(
            err.validation(),
            Some(ValidationError::UnknownRiskProfile { .. })
        ));
    }

    #[test]
    fn test_out_of_range_score_rejected() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 1.0)]);
        let outputs = vec![ModelOutput::new(ModelType::Historical, 1.2, 0.5)];
        let err = engine
            .generate_prediction(&outputs, "moderate", PredictionContext::new())
            .unwrap_err();
        assert!(matches!(
            err.validation(),
            Some(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_only_unweighted_models_is_computation_error() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 1.0)]);
        let outputs = vec![ModelOutput::new(ModelType::Sentiment, 0.7, 0.7)];
        let err = engine
            .generate_prediction(&outputs, "moderate", PredictionContext::new())
            .unwrap_err();
        assert!(err.is_computation());
        assert_eq!(err.stage, "Combining");
    }

    #[test]
    fn test_skipped_model_recorded_in_decision_path() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 1.0)]);
        let outputs = vec![
            ModelOutput::new(ModelType::Historical, 0.7, 0.8),
            ModelOutput::new(ModelType::Sentiment, 0.1, 0.1),
        ];
        let prediction = engine
            .generate_prediction(&outputs, "moderate", PredictionContext::new())
            .unwrap();
        assert!(
            prediction
                .metadata
                .decision_path
                .iter()
                .any(|s| s.contains("skipped sentiment"))
        );
    }

    #[test]
    fn test_update_weights_bumps_version_and_persists() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 0.6), (ModelType::Market, 0.4)]);
        engine
            .update_model_weights(&[ModelWeight::new(ModelType::Market, 0.9)])
            .unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.model_weights[&ModelType::Market], 0.9);
        assert_eq!(snapshot.model_weights[&ModelType::Historical], 0.6);

        let prediction = engine
            .generate_prediction(&reference_outputs(), "moderate", PredictionContext::new())
            .unwrap();
        assert_eq!(prediction.metadata.config_version, 2);
        assert_eq!(prediction.model_contributions[&ModelType::Market].weight, 0.9);
    }

    #[test]
    fn test_invalid_weight_rejected_without_publishing() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 1.0)]);
        let result = engine.update_model_weights(&[ModelWeight::new(ModelType::Market, -1.0)]);
        assert!(matches!(
            result,
            Err(EngineError::Validation(ValidationError::InvalidWeight { .. }))
        ));
        assert_eq!(engine.snapshot().version, 1);
    }

    #[test]
    fn test_update_risk_profiles() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 1.0)]);
        engine
            .update_risk_profiles(&[RiskProfile::new("degen", 2.0)])
            .unwrap();
        assert_eq!(engine.get_engine_metrics().risk_profile_count, 4);

        let outputs = vec![ModelOutput::new(ModelType::Historical, 0.5, 0.5)];
        let prediction = engine
            .generate_prediction(&outputs, "degen", PredictionContext::new())
            .unwrap();
        assert!((prediction.final_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_engine_metrics() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 0.5), (ModelType::Market, 0.5)]);
        let metrics = engine.get_engine_metrics();
        assert_eq!(metrics.model_count, 2);
        assert_eq!(metrics.risk_profile_count, 3);
        assert_eq!(metrics.sure_odds_threshold, 0.85);
        assert_eq!(metrics.feature_threshold, 0.05);
    }

    #[test]
    fn test_validate_prediction_flags_violations() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 0.6), (ModelType::Market, 0.4)]);
        let prediction = engine
            .generate_prediction(&reference_outputs(), "moderate", PredictionContext::new())
            .unwrap();

        let mut bad_window = prediction.clone();
        bad_window.confidence_window.start = bad_window.confidence_window.end + 1;
        assert!(!engine.validate_prediction(&bad_window));

        let mut bad_payout = prediction.clone();
        bad_payout.payout_range.min = bad_payout.payout_range.max + 1.0;
        assert!(!engine.validate_prediction(&bad_payout));

        let mut overlap = prediction.clone();
        overlap.supporting_features = overlap.top_features.clone();
        assert!(!engine.validate_prediction(&overlap));
    }

    #[test]
    fn test_validate_prediction_json() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 0.6), (ModelType::Market, 0.4)]);
        let prediction = engine
            .generate_prediction(&reference_outputs(), "moderate", PredictionContext::new())
            .unwrap();

        let mut json = serde_json::to_value(&prediction).unwrap();
        assert!(engine.validate_prediction_json(&json));

        json["riskLevel"] = json!("extreme");
        assert!(!engine.validate_prediction_json(&json));

        let mut missing = serde_json::to_value(&prediction).unwrap();
        missing.as_object_mut().unwrap().remove("payoutRange");
        assert!(!engine.validate_prediction_json(&missing));
    }

    #[test]
    fn test_calculate_shap_values_uses_recorded_stats() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 1.0)]);
        engine
            .feature_statistics()
            .record("form", FeatureStats::new(0.5, 0.25));

        let features: FeatureMap = [("form".to_string(), 0.75)].into_iter().collect();
        let explanation = engine
            .calculate_shap_values(ModelType::Historical, &features, 0.7)
            .unwrap();

        // simulated importance for "form" is 0.4
        let value = &explanation.values[0];
        assert!((value.impact - 0.4).abs() < 1e-12);
        assert!((value.confidence - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_combine_predictions() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 0.6), (ModelType::Market, 0.4)]);
        let predictions: BTreeMap<ModelType, ModelOutput> = reference_outputs()
            .into_iter()
            .map(|o| (o.model_type, o))
            .collect();

        let combined = engine.combine_predictions(&predictions).unwrap();
        assert!((combined.prediction - 0.72).abs() < 1e-9);
        assert!((combined.confidence - 0.82).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_prediction_with_explanation() {
        let (engine, sink) = engine_with(&[
            (ModelType::Historical, 0.4),
            (ModelType::Market, 0.3),
            (ModelType::Sentiment, 0.3),
        ]);
        let features: FeatureMap = [("form".to_string(), 0.8), ("odds_drift".to_string(), 0.3)]
            .into_iter()
            .collect();

        let result = engine
            .generate_prediction_with_explanation(&features, "moderate")
            .await
            .unwrap();

        assert_eq!(result.explanations.len(), 3);
        assert!(result.omitted_models.is_empty());
        assert!((0.0..=1.0).contains(&result.prediction));
        assert!((0.0..=1.0).contains(&result.confidence));
        assert_eq!(result.risk_profile, "moderate");
        assert_eq!(sink.count("explanation_generated"), 1);
    }

    #[tokio::test]
    async fn test_explanation_with_unknown_profile_fails() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 1.0)]);
        let err = engine
            .generate_prediction_with_explanation(&FeatureMap::new(), "yolo")
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let (engine, _) = engine_with(&[(ModelType::Historical, 0.6), (ModelType::Market, 0.4)]);
        let outputs: Vec<ModelOutput> = serde_json::from_value(json!([
            {"type": "historical", "score": 0.8, "confidence": 0.9, "timestamp": i64::MIN},
            {"type": "market", "score": 0.6, "confidence": 0.7, "timestamp": i64::MAX},
        ]))
        .unwrap();

        let prediction = engine
            .generate_prediction(&outputs, "moderate", PredictionContext::new())
            .unwrap();

        // Ancient output is fully stale, future one counts as fresh
        assert!((prediction.metadata.data_freshness - 0.5).abs() < 1e-12);
        assert_eq!(prediction.confidence_window.start, i64::MIN);
        assert_eq!(prediction.confidence_window.end, i64::MAX);
        assert!(engine.validate_prediction(&prediction));
    }

    #[tokio::test]
    async fn test_omission_metric_reason_is_bounded() {
        let config = EngineConfig {
            model_weights: [(ModelType::Historical, 0.5), (ModelType::Market, 0.5)]
                .into_iter()
                .collect(),
            ..EngineConfig::default()
        };
        let sink = Arc::new(RecordingMetricsSink::new());
        let mut services = simulated_services();
        services.metrics = sink.clone();
        services.model_runner = Arc::new(
            crate::infrastructure::mock::SimulatedModelRunner::new()
                .with_failure(ModelType::Market, "upstream 503 for request 8f2c"),
        );
        let engine = PredictionEngine::new(config, services).unwrap();

        let result = engine.generate_predictions(&FeatureMap::new()).await;
        assert_eq!(result.omitted.len(), 1);
        assert!(result.omitted[0].reason.to_string().contains("8f2c"));

        let events = sink.events();
        let (_, attrs) = events
            .iter()
            .find(|(name, _)| name == "model_omitted")
            .unwrap();
        assert_eq!(attrs["reason"], json!("failed"));
        assert_eq!(attrs["model"], json!("market"));
    }
}
