use std::collections::BTreeMap;

use proptest::prelude::*;
use sureodds::application::ensemble::{EnsembleCombiner, RiskClassifier, aggregate_features};
use sureodds::config::RiskThresholds;
use sureodds::domain::prediction::types::{ModelOutput, ModelType, RiskLevel, RiskProfile};

fn output_strategy() -> impl Strategy<Value = Vec<ModelOutput>> {
    prop::collection::vec((0.0..=1.0f64, 0.0..=1.0f64), 1..=4).prop_map(|pairs| {
        pairs
            .into_iter()
            .zip(ModelType::ALL)
            .map(|((score, confidence), model)| ModelOutput::new(model, score, confidence))
            .collect()
    })
}

fn weights_strategy() -> impl Strategy<Value = BTreeMap<ModelType, f64>> {
    prop::array::uniform4(0.01..5.0f64)
        .prop_map(|w| ModelType::ALL.into_iter().zip(w).collect())
}

/// Score / confidence pairs, half of them placed so the risk score lands
/// within 0.02 of the 0.3 or 0.6 threshold.
fn score_confidence_strategy() -> impl Strategy<Value = (f64, f64)> {
    let uniform = (0.0..=1.0f64, 0.0..=1.0f64);
    let targets = prop_oneof![0.28..0.32f64, 0.58..0.62f64];
    let near_threshold = (0.0..=1.0f64, targets).prop_map(|(score, target)| {
        let confidence = 1.0 - target / (1.0 + (score - 0.5).abs());
        (score, confidence)
    });
    prop_oneof![uniform, near_threshold]
}

fn expected_level(risk_score: f64) -> RiskLevel {
    if risk_score < 0.3 {
        RiskLevel::Low
    } else if risk_score < 0.6 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

fn classifier() -> RiskClassifier {
    RiskClassifier::new(RiskThresholds::default(), 0.85, 0.2)
}

proptest! {
    #[test]
    fn combined_score_stays_in_unit_range(
        outputs in output_strategy(),
        weights in weights_strategy(),
    ) {
        let combined = EnsembleCombiner::combine(&outputs, &weights).unwrap();
        prop_assert!((0.0..=1.0 + 1e-12).contains(&combined.weighted_score));
        prop_assert!((0.0..=1.0 + 1e-12).contains(&combined.average_confidence));
    }

    #[test]
    fn payout_range_is_ordered(
        score in 0.0..=1.0f64,
        confidence in 0.0..=1.0f64,
        multiplier in 0.01..10.0f64,
    ) {
        let profile = RiskProfile::new("p", multiplier);
        let assessment = classifier().assess(score, confidence, &profile);
        prop_assert!(assessment.payout_range.is_ordered());
    }

    #[test]
    fn risk_level_follows_thresholds((score, confidence) in score_confidence_strategy()) {
        let profile = RiskProfile::new("moderate", 1.0);
        let assessment = classifier().assess(score, confidence, &profile);

        let expected_score = (1.0 - confidence) * (1.0 + (score - 0.5).abs());
        prop_assert!((assessment.risk_score - expected_score).abs() < 1e-12);
        prop_assert_eq!(assessment.risk_level, expected_level(assessment.risk_score));
    }

    #[test]
    fn lower_confidence_never_lowers_risk_level(
        score in 0.0..=1.0f64,
        a in 0.0..=1.0f64,
        b in 0.0..=1.0f64,
    ) {
        let (low_conf, high_conf) = if a <= b { (a, b) } else { (b, a) };
        let profile = RiskProfile::new("moderate", 1.0);
        let c = classifier();
        prop_assert!(
            c.assess(score, low_conf, &profile).risk_level
                >= c.assess(score, high_conf, &profile).risk_level
        );
    }

    #[test]
    fn aggregation_is_idempotent(
        values in prop::collection::vec(-1.0..1.0f64, 1..8),
        max_features in 1usize..6,
    ) {
        let output = values.iter().enumerate().fold(
            ModelOutput::new(ModelType::Historical, 0.5, 0.5),
            |o, (i, v)| o.with_feature(format!("f{}", i), *v),
        );
        let once = aggregate_features(std::slice::from_ref(&output), max_features, 0.05);
        let merged_with_itself =
            aggregate_features(&[output.clone(), output.clone()], max_features, 0.05);
        prop_assert_eq!(once, merged_with_itself);
    }
}

#[test]
fn risk_level_transitions_at_thresholds() {
    let c = classifier();
    assert_eq!(c.level_for(0.0), RiskLevel::Low);
    assert_eq!(c.level_for(0.3), RiskLevel::Medium);
    assert_eq!(c.level_for(0.6), RiskLevel::High);
}
