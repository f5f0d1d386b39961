//! Fan-out configuration for the multi-model prediction path.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Maximum number of model calls in flight at once
    pub max_concurrency: usize,
    /// Per-model timeout; a slower model is dropped from the ensemble
    pub model_timeout_ms: u64,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            model_timeout_ms: 2_000,
        }
    }
}

impl FanOutConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms)
    }

    /// Override fields from `FANOUT_MAX_CONCURRENCY` / `MODEL_TIMEOUT_MS` when set.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = env::var("FANOUT_MAX_CONCURRENCY") {
            self.max_concurrency = value
                .parse::<usize>()
                .context("Failed to parse FANOUT_MAX_CONCURRENCY")?;
        }
        if let Ok(value) = env::var("MODEL_TIMEOUT_MS") {
            self.model_timeout_ms = value
                .parse::<u64>()
                .context("Failed to parse MODEL_TIMEOUT_MS")?;
        }
        Ok(())
    }
}
