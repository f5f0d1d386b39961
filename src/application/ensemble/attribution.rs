//! Feature attribution.
//!
//! Two independent views of "what drove the result":
//! - `aggregate_features` merges every model's feature map into ranked
//!   top / supporting lists
//! - `ShapCalculator` decomposes a single model's prediction into signed
//!   per-feature impacts using z-scores against the statistics store

use super::confidence::ConfidenceSynthesizer;
use crate::domain::prediction::feature_stats::FeatureStatistics;
use crate::domain::prediction::types::{
    Direction, FeatureImpact, FeatureMap, ModelOutput, ModelType, ShapExplanation, ShapValue,
};
use std::collections::HashMap;

pub const SHAP_BASE_VALUE: f64 = 0.5;

/// z-score at which a feature's own confidence reaches zero
const ZERO_CONFIDENCE_Z: f64 = 3.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedFeatures {
    pub top: Vec<FeatureImpact>,
    pub supporting: Vec<FeatureImpact>,
}

impl RankedFeatures {
    pub fn len(&self) -> usize {
        self.top.len() + self.supporting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_empty() && self.supporting.is_empty()
    }
}

/// Merge `(name, value)` pairs into one entry per name.
///
/// A repeated name replaces weight and impact with the mean of the previous
/// entry and the new value (a last-two-values average, not an all-time mean).
/// First-seen order is kept, so the later stable sort breaks ties by it.
pub fn merge_feature_values<'a, I>(pairs: I) -> Vec<FeatureImpact>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut merged: Vec<FeatureImpact> = Vec::new();
    let mut index: HashMap<&'a str, usize> = HashMap::new();

    for (name, value) in pairs {
        if !value.is_finite() {
            continue;
        }
        match index.get(name).copied() {
            Some(i) => {
                let entry = &mut merged[i];
                let averaged = (entry.impact + value) / 2.0;
                entry.weight = averaged;
                entry.impact = averaged;
            }
            None => {
                index.insert(name, merged.len());
                merged.push(FeatureImpact {
                    name: name.to_string(),
                    weight: value,
                    impact: value,
                });
            }
        }
    }

    merged
}

/// Merge all model feature maps, drop entries under `threshold` and split the
/// ranking into `max_features` top entries followed by `max_features`
/// supporting entries.
pub fn aggregate_features(
    outputs: &[ModelOutput],
    max_features: usize,
    threshold: f64,
) -> RankedFeatures {
    let pairs = outputs
        .iter()
        .flat_map(|o| o.features.iter().map(|(k, v)| (k.as_str(), *v)));

    let mut merged = merge_feature_values(pairs);
    merged.retain(|f| f.impact.abs() >= threshold);
    merged.sort_by(|a, b| b.impact.abs().total_cmp(&a.impact.abs()));

    let mut rest = merged.into_iter();
    let top: Vec<FeatureImpact> = rest.by_ref().take(max_features).collect();
    let supporting: Vec<FeatureImpact> = rest.take(max_features).collect();

    RankedFeatures { top, supporting }
}

/// SHAP-style per-feature decomposition for a single model
pub struct ShapCalculator<'a> {
    stats: &'a FeatureStatistics,
    synthesizer: ConfidenceSynthesizer,
}

impl<'a> ShapCalculator<'a> {
    pub fn new(stats: &'a FeatureStatistics, synthesizer: ConfidenceSynthesizer) -> Self {
        Self { stats, synthesizer }
    }

    pub fn shap_value(&self, feature: &str, value: f64, importance: f64) -> ShapValue {
        let z_score = self.stats.stats_for(feature).z_score(value);
        let impact = importance * z_score;

        ShapValue {
            feature: feature.to_string(),
            value,
            impact,
            direction: Direction::of(impact),
            confidence: (1.0 - z_score.abs() / ZERO_CONFIDENCE_Z).max(0.0),
        }
    }

    /// Features missing from `importance` get zero impact.
    pub fn explain(
        &self,
        model: ModelType,
        features: &FeatureMap,
        importance: &HashMap<String, f64>,
        prediction: f64,
    ) -> ShapExplanation {
        let mut values: Vec<ShapValue> = features
            .iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(name, value)| {
                let weight = importance.get(name).copied().unwrap_or(0.0);
                self.shap_value(name, *value, weight)
            })
            .collect();
        values.sort_by(|a, b| b.impact.abs().total_cmp(&a.impact.abs()));

        let confidence = self.synthesizer.synthesize(&values, prediction);

        ShapExplanation {
            model,
            base_value: SHAP_BASE_VALUE,
            values,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prediction::feature_stats::FeatureStats;
    use std::collections::HashSet;

    fn output(model: ModelType, features: &[(&str, f64)]) -> ModelOutput {
        let mut o = ModelOutput::new(model, 0.5, 0.5);
        for (k, v) in features {
            o = o.with_feature(*k, *v);
        }
        o
    }

    #[test]
    fn test_repeat_name_averages_last_two_values() {
        let merged = merge_feature_values(vec![("x", 0.2), ("x", 0.4), ("x", 1.0)]);
        assert_eq!(merged.len(), 1);
        // ((0.2 + 0.4) / 2 + 1.0) / 2
        assert!((merged[0].impact - 0.65).abs() < 1e-12);
        assert_eq!(merged[0].weight, merged[0].impact);
    }

    #[test]
    fn test_merging_list_with_itself_is_idempotent() {
        let first = merge_feature_values(vec![("a", 0.3), ("b", -0.7), ("c", 0.1)]);
        let doubled = merge_feature_values(
            first
                .iter()
                .chain(first.iter())
                .map(|f| (f.name.as_str(), f.impact)),
        );
        assert_eq!(doubled, first);
    }

    #[test]
    fn test_ranking_splits_top_and_supporting() {
        let outputs = vec![
            output(
                ModelType::Historical,
                &[("a", 0.9), ("b", -0.8), ("c", 0.1)],
            ),
            output(ModelType::Market, &[("d", 0.5), ("e", -0.3), ("f", 0.2)]),
        ];

        let ranked = aggregate_features(&outputs, 2, 0.0);
        let top: Vec<&str> = ranked.top.iter().map(|f| f.name.as_str()).collect();
        let supporting: Vec<&str> = ranked.supporting.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(top, vec!["a", "b"]);
        assert_eq!(supporting, vec!["d", "e"]);

        let names: HashSet<&str> = top.iter().chain(supporting.iter()).copied().collect();
        assert_eq!(names.len(), ranked.len());
    }

    #[test]
    fn test_threshold_drops_weak_features() {
        let outputs = vec![output(ModelType::Sentiment, &[("loud", 0.6), ("quiet", 0.01)])];
        let ranked = aggregate_features(&outputs, 5, 0.05);
        assert_eq!(ranked.top.len(), 1);
        assert_eq!(ranked.top[0].name, "loud");
        assert!(ranked.supporting.is_empty());
    }

    #[test]
    fn test_shared_feature_merged_across_models() {
        let outputs = vec![
            output(ModelType::Historical, &[("form", 0.8)]),
            output(ModelType::Market, &[("form", 0.4)]),
        ];
        let ranked = aggregate_features(&outputs, 5, 0.0);
        assert_eq!(ranked.len(), 1);
        assert!((ranked.top[0].impact - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_shap_reference_scenario() {
        let stats = FeatureStatistics::new();
        stats.record("x", FeatureStats::new(0.5, 0.25));
        let calc = ShapCalculator::new(&stats, ConfidenceSynthesizer::default());

        let value = calc.shap_value("x", 0.75, 0.4);
        assert!((value.impact - 0.4).abs() < 1e-12);
        assert_eq!(value.direction, Direction::Positive);
        assert!((value.confidence - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_shap_confidence_floors_at_zero() {
        let stats = FeatureStatistics::new();
        stats.record("x", FeatureStats::new(0.0, 0.1));
        let calc = ShapCalculator::new(&stats, ConfidenceSynthesizer::default());

        let value = calc.shap_value("x", 1.0, 1.0);
        assert_eq!(value.confidence, 0.0);
    }

    #[test]
    fn test_explain_sorts_and_defaults_missing_importance() {
        let stats = FeatureStatistics::new();
        let calc = ShapCalculator::new(&stats, ConfidenceSynthesizer::default());

        let features: FeatureMap = [
            ("a".to_string(), 0.6),
            ("b".to_string(), 0.0),
            ("c".to_string(), 0.9),
        ]
        .into_iter()
        .collect();
        let importance = HashMap::from([("a".to_string(), 1.0), ("b".to_string(), 0.5)]);

        let explanation = calc.explain(ModelType::Market, &features, &importance, 0.7);
        assert_eq!(explanation.base_value, SHAP_BASE_VALUE);
        assert_eq!(explanation.model, ModelType::Market);

        let order: Vec<&str> = explanation.values.iter().map(|v| v.feature.as_str()).collect();
        // b: 0.5 * (0.0 - 0.5) = -0.25, a: 1.0 * 0.1 = 0.1, c: no importance -> 0
        assert_eq!(order, vec!["b", "a", "c"]);
        assert_eq!(explanation.values[2].impact, 0.0);
        assert_eq!(explanation.values[2].direction, Direction::Negative);
        assert!((0.0..=1.0).contains(&explanation.confidence));
    }
}
