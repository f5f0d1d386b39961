use crate::domain::errors::{EngineError, PredictionError};
use crate::domain::prediction::types::PredictionContext;
use std::fmt;
use std::time::Instant;
use tracing::debug;

/// Orchestrator stages, in the only order they may be visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PredictionStage {
    Idle,
    Validating,
    Combining,
    Classifying,
    Attributing,
    Assembling,
    Done,
    Failed,
}

impl PredictionStage {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Validating),
            Self::Validating => Some(Self::Combining),
            Self::Combining => Some(Self::Classifying),
            Self::Classifying => Some(Self::Attributing),
            Self::Attributing => Some(Self::Assembling),
            Self::Assembling => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PredictionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Validating => "Validating",
            Self::Combining => "Combining",
            Self::Classifying => "Classifying",
            Self::Attributing => "Attributing",
            Self::Assembling => "Assembling",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Per-call bookkeeping: current stage, decision path and timing
#[derive(Debug)]
pub struct PredictionRun {
    stage: PredictionStage,
    failed_at: Option<PredictionStage>,
    started: Instant,
    decision_path: Vec<String>,
    context: PredictionContext,
}

impl PredictionRun {
    pub fn new(context: PredictionContext) -> Self {
        Self {
            stage: PredictionStage::Idle,
            failed_at: None,
            started: Instant::now(),
            decision_path: Vec::new(),
            context,
        }
    }

    pub fn stage(&self) -> PredictionStage {
        self.stage
    }

    pub fn failed_at(&self) -> Option<PredictionStage> {
        self.failed_at
    }

    pub fn context(&self) -> &PredictionContext {
        &self.context
    }

    /// Move to the following stage; stages can neither be skipped nor revisited.
    pub fn advance(&mut self, next: PredictionStage) {
        debug_assert_eq!(
            self.stage.next(),
            Some(next),
            "illegal stage transition {} -> {}",
            self.stage,
            next
        );
        debug!("Prediction stage: {} -> {}", self.stage, next);
        self.stage = next;
    }

    pub fn record(&mut self, step: impl Into<String>) {
        self.decision_path.push(step.into());
    }

    pub fn decision_path(&self) -> &[String] {
        &self.decision_path
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Enter `Failed` and wrap the cause together with the caller's context.
    pub fn fail(&mut self, source: EngineError) -> PredictionError {
        let stage = self.stage;
        self.failed_at = Some(stage);
        self.stage = PredictionStage::Failed;
        PredictionError::new(stage.to_string(), source, self.context.clone())
    }
}
