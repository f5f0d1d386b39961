//! Versioned weight / risk-profile configuration.
//!
//! Readers load one `Arc<EngineSnapshot>` per call and use it throughout, so a
//! prediction never sees a half-applied update. Writers are serialized and
//! publish a complete new snapshot atomically.

use crate::config::EngineConfig;
use crate::domain::errors::ValidationError;
use crate::domain::prediction::types::{ModelType, RiskProfile};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub version: u64,
    pub model_weights: BTreeMap<ModelType, f64>,
    pub risk_profiles: BTreeMap<String, RiskProfile>,
}

impl EngineSnapshot {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            version: 1,
            model_weights: config.model_weights.clone(),
            risk_profiles: Self::profiles_from_multipliers(&config.risk_profiles),
        }
    }

    pub fn profiles_from_multipliers(
        multipliers: &BTreeMap<String, f64>,
    ) -> BTreeMap<String, RiskProfile> {
        multipliers
            .iter()
            .map(|(name, m)| (name.clone(), RiskProfile::new(name.clone(), *m)))
            .collect()
    }

    pub fn risk_multipliers(&self) -> BTreeMap<String, f64> {
        self.risk_profiles
            .iter()
            .map(|(name, p)| (name.clone(), p.multiplier))
            .collect()
    }

    pub fn risk_profile(&self, name: &str) -> Result<&RiskProfile, ValidationError> {
        self.risk_profiles
            .get(name)
            .ok_or_else(|| ValidationError::UnknownRiskProfile {
                name: name.to_string(),
            })
    }
}

pub struct SnapshotCell {
    current: ArcSwap<EngineSnapshot>,
    writer: Mutex<()>,
}

impl SnapshotCell {
    pub fn new(snapshot: EngineSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Arc<EngineSnapshot> {
        self.current.load_full()
    }

    /// Build the next snapshot from the current one and publish it.
    ///
    /// If `build` fails nothing is published. The version is bumped here.
    pub fn update<F, E>(&self, build: F) -> Result<Arc<EngineSnapshot>, E>
    where
        F: FnOnce(&EngineSnapshot) -> Result<EngineSnapshot, E>,
    {
        let _guard = self.writer.lock();
        let current = self.current.load_full();
        let mut next = build(&current)?;
        next.version = current.version + 1;

        let next = Arc::new(next);
        self.current.store(next.clone());
        Ok(next)
    }
}
