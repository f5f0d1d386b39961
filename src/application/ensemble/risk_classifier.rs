use super::combiner::CombinedScore;
use crate::config::RiskThresholds;
use crate::domain::prediction::types::{PayoutRange, RiskLevel, RiskProfile};

/// Risk-level, score and payout band for one combined result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub final_score: f64,
    pub is_sure_odds: bool,
    pub payout_range: PayoutRange,
}

/// Maps a combined score and a risk profile to a discrete risk level and payout range.
///
/// The profile multiplier is applied exactly once, inside `final_score`; the
/// payout band is then taken around that already-scaled value.
#[derive(Debug, Clone, Copy)]
pub struct RiskClassifier {
    thresholds: RiskThresholds,
    sure_odds_threshold: f64,
    payout_band: f64,
}

impl RiskClassifier {
    pub fn new(thresholds: RiskThresholds, sure_odds_threshold: f64, payout_band: f64) -> Self {
        Self {
            thresholds,
            sure_odds_threshold,
            payout_band,
        }
    }

    /// `(1 - confidence) * (1 + |score - 0.5|)`: low confidence and extreme scores are riskier
    pub fn risk_score(weighted_score: f64, average_confidence: f64) -> f64 {
        (1.0 - average_confidence) * (1.0 + (weighted_score - 0.5).abs())
    }

    pub fn level_for(&self, risk_score: f64) -> RiskLevel {
        if risk_score < self.thresholds.low {
            RiskLevel::Low
        } else if risk_score < self.thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    pub fn payout_range(&self, final_score: f64) -> PayoutRange {
        PayoutRange {
            min: final_score * (1.0 - self.payout_band),
            max: final_score * (1.0 + self.payout_band),
            expected: final_score,
        }
    }

    pub fn classify(&self, combined: &CombinedScore, profile: &RiskProfile) -> RiskAssessment {
        self.assess(
            combined.weighted_score,
            combined.average_confidence,
            profile,
        )
    }

    pub fn assess(&self, score: f64, confidence: f64, profile: &RiskProfile) -> RiskAssessment {
        let risk_score = Self::risk_score(score, confidence);
        let final_score = score * confidence * profile.multiplier;

        RiskAssessment {
            risk_score,
            risk_level: self.level_for(risk_score),
            final_score,
            is_sure_odds: confidence >= self.sure_odds_threshold,
            payout_range: self.payout_range(final_score),
        }
    }
}
