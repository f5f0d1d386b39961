//! Concurrent model fan-out for the raw-features entry point.
//!
//! Every model runs concurrently (bounded by `max_concurrency`) with its own
//! timeout. An optional caller deadline caps the whole join. Models that time
//! out or fail are dropped and reported as omissions; the remaining outputs
//! form a partial ensemble.

use crate::config::FanOutConfig;
use crate::domain::ports::ModelRunner;
use crate::domain::prediction::types::{
    FeatureMap, ModelFanOut, ModelOmission, ModelOutput, ModelScore, ModelType, OmissionReason,
    OutputMetadata,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

enum CallOutcome {
    Scored(ModelScore),
    Failed(String),
    TimedOut,
    DeadlineExceeded,
}

struct ModelCall {
    model: ModelType,
    outcome: CallOutcome,
    latency: Duration,
    budget: Duration,
}

pub async fn fan_out(
    runner: &dyn ModelRunner,
    models: &[ModelType],
    features: &FeatureMap,
    config: &FanOutConfig,
    deadline: Option<Duration>,
) -> ModelFanOut {
    let deadline_at = deadline.map(|d| Instant::now() + d);
    let per_model = config.model_timeout();

    let calls = models.iter().copied().map(|model| async move {
        let started = Instant::now();
        // Budget is fixed when the call actually starts, after any queueing
        let remaining = deadline_at.map(|at| at.saturating_duration_since(started));
        let (budget, deadline_bound) = match remaining {
            Some(r) if r < per_model => (r, true),
            _ => (per_model, false),
        };

        let outcome = match tokio::time::timeout(budget, runner.run(model, features)).await {
            Ok(Ok(score)) => CallOutcome::Scored(score),
            Ok(Err(e)) => CallOutcome::Failed(format!("{:#}", e)),
            Err(_) if deadline_bound => CallOutcome::DeadlineExceeded,
            Err(_) => CallOutcome::TimedOut,
        };

        ModelCall {
            model,
            outcome,
            latency: started.elapsed(),
            budget,
        }
    });

    let finished: Vec<ModelCall> = stream::iter(calls)
        .buffer_unordered(config.max_concurrency.max(1))
        .collect()
        .await;

    let mut result = ModelFanOut::default();
    for call in finished {
        match call.outcome {
            CallOutcome::Scored(score) => {
                match to_output(call.model, score, features, call.latency) {
                    Ok(output) => {
                        debug!(
                            "Model {} scored {:.3} (confidence {:.3}) in {:?}",
                            call.model, output.score, output.confidence, call.latency
                        );
                        result.outputs.insert(call.model, output);
                    }
                    Err(message) => result
                        .omitted
                        .push(omit(call.model, OmissionReason::Failed { message })),
                }
            }
            CallOutcome::Failed(message) => {
                result.omitted.push(omit(call.model, OmissionReason::Failed { message }))
            }
            CallOutcome::TimedOut => result.omitted.push(omit(
                call.model,
                OmissionReason::TimedOut {
                    after_ms: call.budget.as_millis() as u64,
                },
            )),
            CallOutcome::DeadlineExceeded => {
                result.omitted.push(omit(call.model, OmissionReason::DeadlineExceeded))
            }
        }
    }
    result.omitted.sort_by_key(|o| o.model);

    result
}

fn omit(model: ModelType, reason: OmissionReason) -> ModelOmission {
    warn!("Dropping model {} from ensemble: {}", model, reason);
    ModelOmission { model, reason }
}

fn to_output(
    model: ModelType,
    score: ModelScore,
    features: &FeatureMap,
    latency: Duration,
) -> Result<ModelOutput, String> {
    let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
    if !in_unit(score.score) || !in_unit(score.confidence) {
        return Err(format!(
            "runner returned out-of-range score {} / confidence {}",
            score.score, score.confidence
        ));
    }

    Ok(ModelOutput {
        model_type: model,
        score: score.score,
        confidence: score.confidence,
        features: features.clone(),
        timestamp: Utc::now().timestamp_millis(),
        metadata: OutputMetadata {
            signal_strength: (score.score - 0.5).abs() * 2.0,
            latency: latency.as_millis() as u64,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::SimulatedModelRunner;

    fn features() -> FeatureMap {
        [("form".to_string(), 0.7), ("odds_drift".to_string(), 0.4)]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn test_all_models_scored() {
        let runner = SimulatedModelRunner::new();
        let result = fan_out(
            &runner,
            &ModelType::ALL,
            &features(),
            &FanOutConfig::default(),
            None,
        )
        .await;

        assert_eq!(result.outputs.len(), 4);
        assert!(result.omitted.is_empty());
        for output in result.outputs.values() {
            assert_eq!(output.features, features());
            assert!((0.0..=1.0).contains(&output.score));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_model_times_out() {
        let runner = SimulatedModelRunner::new()
            .with_latency(ModelType::Sentiment, Duration::from_secs(10));
        let config = FanOutConfig {
            max_concurrency: 4,
            model_timeout_ms: 100,
        };

        let result = fan_out(&runner, &ModelType::ALL, &features(), &config, None).await;

        assert_eq!(result.outputs.len(), 3);
        assert_eq!(
            result.omitted,
            vec![ModelOmission {
                model: ModelType::Sentiment,
                reason: OmissionReason::TimedOut { after_ms: 100 },
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_deadline_caps_join() {
        let runner = SimulatedModelRunner::new()
            .with_latency(ModelType::Market, Duration::from_millis(500));
        let config = FanOutConfig {
            max_concurrency: 4,
            model_timeout_ms: 2_000,
        };

        let result = fan_out(
            &runner,
            &ModelType::ALL,
            &features(),
            &config,
            Some(Duration::from_millis(50)),
        )
        .await;

        assert_eq!(result.outputs.len(), 3);
        assert_eq!(result.omitted[0].model, ModelType::Market);
        assert_eq!(result.omitted[0].reason, OmissionReason::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_failing_model_omitted() {
        let runner =
            SimulatedModelRunner::new().with_failure(ModelType::Correlation, "feed offline");
        let result = fan_out(
            &runner,
            &ModelType::ALL,
            &features(),
            &FanOutConfig::default(),
            None,
        )
        .await;

        assert_eq!(result.outputs.len(), 3);
        match &result.omitted[0].reason {
            OmissionReason::Failed { message } => assert!(message.contains("feed offline")),
            other => panic!("unexpected omission: {:?}", other),
        }
    }
}
