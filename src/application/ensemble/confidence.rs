use crate::config::ConfidenceWeights;
use crate::domain::prediction::types::{Direction, ShapValue};

/// Breakdown of an explanation's confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceFactors {
    pub consistency: f64,
    pub feature_confidence: f64,
    pub agreement: f64,
}

impl ConfidenceFactors {
    pub fn as_array(&self) -> [f64; 3] {
        [self.consistency, self.feature_confidence, self.agreement]
    }
}

/// Confidence Synthesizer
///
/// Blends three views of an attribution into one number:
/// - consistency: share of entries pointing the majority way
/// - feature confidence: mean per-entry confidence
/// - agreement: share of entries pointing the same way as the prediction
///
/// All three are 0.5 (no information) for an empty attribution.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceSynthesizer {
    weights: ConfidenceWeights,
}

impl ConfidenceSynthesizer {
    const NEUTRAL: f64 = 0.5;

    pub fn new(weights: ConfidenceWeights) -> Self {
        Self { weights }
    }

    pub fn factors<'a, I>(&self, values: I, prediction: f64) -> ConfidenceFactors
    where
        I: IntoIterator<Item = &'a ShapValue>,
    {
        let expected = Direction::of_prediction(prediction);

        let mut total = 0_usize;
        let mut positive = 0_usize;
        let mut agreeing = 0_usize;
        let mut confidence_sum = 0.0_f64;

        for value in values {
            total += 1;
            if Direction::of(value.impact) == Direction::Positive {
                positive += 1;
            }
            if Direction::of(value.impact) == expected {
                agreeing += 1;
            }
            confidence_sum += value.confidence;
        }

        if total == 0 {
            return ConfidenceFactors {
                consistency: Self::NEUTRAL,
                feature_confidence: Self::NEUTRAL,
                agreement: Self::NEUTRAL,
            };
        }

        let n = total as f64;
        let negative = total - positive;
        ConfidenceFactors {
            consistency: positive.max(negative) as f64 / n,
            feature_confidence: confidence_sum / n,
            agreement: agreeing as f64 / n,
        }
    }

    pub fn synthesize<'a, I>(&self, values: I, prediction: f64) -> f64
    where
        I: IntoIterator<Item = &'a ShapValue>,
    {
        let factors = self.factors(values, prediction);
        let score: f64 = factors
            .as_array()
            .iter()
            .zip(self.weights.as_array())
            .map(|(f, w)| f * w)
            .sum();
        score.clamp(0.0, 1.0)
    }
}

impl Default for ConfidenceSynthesizer {
    fn default() -> Self {
        Self::new(ConfidenceWeights::default())
    }
}
