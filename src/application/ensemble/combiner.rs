use crate::domain::errors::ComputationError;
use crate::domain::prediction::types::{ModelContribution, ModelOutput, ModelType};
use std::collections::BTreeMap;

/// Result of folding several model outputs with their configured weights
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedScore {
    pub weighted_score: f64,
    pub average_confidence: f64,
    pub total_weight: f64,
    /// One entry per known model type; zeroed when the type did not contribute
    pub contributions: BTreeMap<ModelType, ModelContribution>,
    /// Outputs dropped because their type has no configured weight
    pub skipped: Vec<ModelType>,
}

impl CombinedScore {
    pub fn contributing_models(&self) -> usize {
        self.contributions
            .values()
            .filter(|c| c.weight > 0.0)
            .count()
    }
}

/// Ensemble Combiner
///
/// Weighted average of model scores and confidences.
/// - Outputs whose type has no weight are skipped and reported
/// - A zero total weight is an error, never a silent NaN or zero
pub struct EnsembleCombiner;

impl EnsembleCombiner {
    pub fn combine<'a, I>(
        outputs: I,
        weights: &BTreeMap<ModelType, f64>,
    ) -> Result<CombinedScore, ComputationError>
    where
        I: IntoIterator<Item = &'a ModelOutput>,
    {
        let mut contributions: BTreeMap<ModelType, ModelContribution> = ModelType::ALL
            .iter()
            .map(|t| (*t, ModelContribution::default()))
            .collect();
        let mut skipped = Vec::new();

        let mut total_weight = 0.0_f64;
        let mut weighted_score = 0.0_f64;
        let mut total_confidence = 0.0_f64;

        for output in outputs {
            let Some(&weight) = weights.get(&output.model_type) else {
                skipped.push(output.model_type);
                continue;
            };

            total_weight += weight;
            weighted_score += output.score * weight;
            total_confidence += output.confidence * weight;

            contributions.insert(
                output.model_type,
                ModelContribution {
                    weight,
                    confidence: output.confidence,
                    score: output.score,
                },
            );
        }

        if total_weight <= 0.0 {
            return Err(ComputationError::NoWeightedModels);
        }

        let weighted_score = weighted_score / total_weight;
        let average_confidence = total_confidence / total_weight;
        if !weighted_score.is_finite() || !average_confidence.is_finite() {
            return Err(ComputationError::NonFinite {
                stage: "combining".to_string(),
            });
        }

        Ok(CombinedScore {
            weighted_score,
            average_confidence,
            total_weight,
            contributions,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(ModelType, f64)]) -> BTreeMap<ModelType, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_weighted_average() {
        let outputs = vec![
            ModelOutput::new(ModelType::Historical, 0.8, 0.9),
            ModelOutput::new(ModelType::Market, 0.6, 0.7),
        ];
        let w = weights(&[(ModelType::Historical, 0.6), (ModelType::Market, 0.4)]);

        let combined = EnsembleCombiner::combine(&outputs, &w).unwrap();
        assert!((combined.weighted_score - 0.72).abs() < 1e-9);
        assert!((combined.average_confidence - 0.82).abs() < 1e-9);
        assert!((combined.total_weight - 1.0).abs() < 1e-9);
        assert_eq!(combined.contributing_models(), 2);
    }

    #[test]
    fn test_contributions_cover_every_model_type() {
        let outputs = vec![ModelOutput::new(ModelType::Sentiment, 0.4, 0.5)];
        let w = weights(&[(ModelType::Sentiment, 1.0)]);

        let combined = EnsembleCombiner::combine(&outputs, &w).unwrap();
        assert_eq!(combined.contributions.len(), ModelType::ALL.len());
        assert_eq!(
            combined.contributions[&ModelType::Market],
            ModelContribution::default()
        );
        assert_eq!(combined.contributions[&ModelType::Sentiment].weight, 1.0);
    }

    #[test]
    fn test_unweighted_type_is_skipped() {
        let outputs = vec![
            ModelOutput::new(ModelType::Historical, 0.8, 0.9),
            ModelOutput::new(ModelType::Correlation, 0.1, 0.1),
        ];
        let w = weights(&[(ModelType::Historical, 0.5)]);

        let combined = EnsembleCombiner::combine(&outputs, &w).unwrap();
        assert_eq!(combined.skipped, vec![ModelType::Correlation]);
        assert!((combined.weighted_score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_no_weighted_models_fails_loudly() {
        let outputs = vec![ModelOutput::new(ModelType::Correlation, 0.5, 0.5)];
        let w = weights(&[(ModelType::Historical, 0.5)]);
        assert_eq!(
            EnsembleCombiner::combine(&outputs, &w),
            Err(ComputationError::NoWeightedModels)
        );
    }

    #[test]
    fn test_all_zero_weights_fails_loudly() {
        let outputs = vec![ModelOutput::new(ModelType::Market, 0.5, 0.5)];
        let w = weights(&[(ModelType::Market, 0.0)]);
        assert_eq!(
            EnsembleCombiner::combine(&outputs, &w),
            Err(ComputationError::NoWeightedModels)
        );
    }
}
