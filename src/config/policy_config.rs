//! Tunable scoring policy: risk-level cut points and confidence factor weights.

use crate::domain::errors::ValidationError;
use serde::{Deserialize, Serialize};

/// Cut points on the risk score: `< low` is low, `< medium` is medium, else high.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub low: f64,
    pub medium: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: 0.3,
            medium: 0.6,
        }
    }
}

impl RiskThresholds {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.low.is_finite() && self.medium.is_finite()) || self.low <= 0.0 {
            return Err(ValidationError::InvalidConfiguration {
                reason: format!("risk thresholds must be finite and positive: {:?}", self),
            });
        }
        if self.low >= self.medium {
            return Err(ValidationError::InvalidConfiguration {
                reason: format!(
                    "risk threshold low ({}) must be below medium ({})",
                    self.low, self.medium
                ),
            });
        }
        Ok(())
    }
}

/// Weights for consistency, feature confidence and model agreement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub consistency: f64,
    pub feature_confidence: f64,
    pub agreement: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            consistency: 0.3,
            feature_confidence: 0.3,
            agreement: 0.4,
        }
    }
}

impl ConfidenceWeights {
    const SUM_TOLERANCE: f64 = 1e-6;

    pub fn as_array(&self) -> [f64; 3] {
        [self.consistency, self.feature_confidence, self.agreement]
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let weights = self.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ValidationError::InvalidConfiguration {
                reason: format!("confidence weights must be finite and >= 0: {:?}", weights),
            });
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(ValidationError::InvalidConfiguration {
                reason: format!("confidence weights must sum to 1, got {}", sum),
            });
        }
        Ok(())
    }
}
