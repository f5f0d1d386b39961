//! Configuration module for sureodds.
//!
//! The engine configuration is loaded from an optional TOML file
//! (`SUREODDS_CONFIG`) and then overridden field by field from environment
//! variables, organized by concern: weights and profiles, scoring policy,
//! fan-out and observability.

mod fan_out_config;
mod observability_config;
mod policy_config;

pub use fan_out_config::FanOutConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use policy_config::{ConfidenceWeights, RiskThresholds};

use crate::domain::errors::ValidationError;
use crate::domain::prediction::types::ModelType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

/// Engine configuration: initial weights and risk profiles plus scoring policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub model_weights: BTreeMap<ModelType, f64>,
    /// Risk profile name -> payout multiplier
    pub risk_profiles: BTreeMap<String, f64>,
    pub sure_odds_threshold: f64,
    /// Features whose merged |impact| is below this are not reported
    pub feature_threshold: f64,
    /// Size of each of the top / supporting feature lists
    pub max_features: usize,
    pub risk_thresholds: RiskThresholds,
    /// Relative half-width of the payout band around the expected value
    pub payout_band: f64,
    pub confidence_weights: ConfidenceWeights,
    /// Age at which an input output is considered fully stale
    pub freshness_horizon_ms: u64,
    pub fan_out: FanOutConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_weights: BTreeMap::from([
                (ModelType::Historical, 0.35),
                (ModelType::Market, 0.25),
                (ModelType::Sentiment, 0.2),
                (ModelType::Correlation, 0.2),
            ]),
            risk_profiles: BTreeMap::from([
                ("conservative".to_string(), 0.8),
                ("moderate".to_string(), 1.0),
                ("aggressive".to_string(), 1.2),
            ]),
            sure_odds_threshold: 0.85,
            feature_threshold: 0.05,
            max_features: 5,
            risk_thresholds: RiskThresholds::default(),
            payout_band: 0.2,
            confidence_weights: ConfidenceWeights::default(),
            freshness_horizon_ms: 300_000,
            fan_out: FanOutConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `SUREODDS_CONFIG` (if set), then apply environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var("SUREODDS_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config {:?}", path))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse engine config {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = env::var("MODEL_WEIGHTS") {
            self.model_weights = Self::parse_model_weights(&value)?;
        }
        if let Ok(value) = env::var("RISK_PROFILES") {
            self.risk_profiles = Self::parse_pairs(&value)?;
        }
        self.sure_odds_threshold = Self::parse_f64("SURE_ODDS_THRESHOLD", self.sure_odds_threshold)?;
        self.feature_threshold = Self::parse_f64("FEATURE_THRESHOLD", self.feature_threshold)?;
        self.max_features = Self::parse_usize("MAX_FEATURES", self.max_features)?;
        self.fan_out.apply_env()?;
        Ok(())
    }

    /// Parse `historical:0.4,market:0.3` into a weight map.
    pub fn parse_model_weights(value: &str) -> Result<BTreeMap<ModelType, f64>> {
        Self::parse_pairs(value)?
            .into_iter()
            .map(|(name, weight)| -> Result<(ModelType, f64)> {
                Ok((name.parse::<ModelType>()?, weight))
            })
            .collect()
    }

    fn parse_pairs(value: &str) -> Result<BTreeMap<String, f64>> {
        let mut pairs = BTreeMap::new();
        for entry in value.split(',').filter(|e| !e.trim().is_empty()) {
            let (name, number) = entry
                .split_once(':')
                .with_context(|| format!("Expected name:value, got '{}'", entry))?;
            let number = number
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Failed to parse value in '{}'", entry))?;
            pairs.insert(name.trim().to_lowercase(), number);
        }
        Ok(pairs)
    }

    fn parse_f64(key: &str, default: f64) -> Result<f64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<f64>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_usize(key: &str, default: usize) -> Result<usize> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<usize>()
            .context(format!("Failed to parse {}", key))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (model_type, weight) in &self.model_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ValidationError::InvalidWeight {
                    model_type: *model_type,
                    weight: *weight,
                });
            }
        }
        for (name, multiplier) in &self.risk_profiles {
            if !multiplier.is_finite() || *multiplier <= 0.0 {
                return Err(ValidationError::InvalidMultiplier {
                    name: name.clone(),
                    multiplier: *multiplier,
                });
            }
        }
        if !(0.0..=1.0).contains(&self.sure_odds_threshold) {
            return Err(ValidationError::OutOfRange {
                field: "sure_odds_threshold".to_string(),
                value: self.sure_odds_threshold,
            });
        }
        if !self.feature_threshold.is_finite() || self.feature_threshold < 0.0 {
            return Err(ValidationError::OutOfRange {
                field: "feature_threshold".to_string(),
                value: self.feature_threshold,
            });
        }
        if !(0.0..1.0).contains(&self.payout_band) {
            return Err(ValidationError::OutOfRange {
                field: "payout_band".to_string(),
                value: self.payout_band,
            });
        }
        if self.max_features == 0 {
            return Err(ValidationError::InvalidConfiguration {
                reason: "max_features must be at least 1".to_string(),
            });
        }
        if self.fan_out.max_concurrency == 0 {
            return Err(ValidationError::InvalidConfiguration {
                reason: "fan_out.max_concurrency must be at least 1".to_string(),
            });
        }
        self.risk_thresholds.validate()?;
        self.confidence_weights.validate()?;
        Ok(())
    }
}
