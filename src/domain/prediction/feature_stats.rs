//! Running per-feature statistics used to normalize raw feature values.
//!
//! Features without usable statistics fall back to mean 0.5 / std 1.0, so a
//! fresh store still produces finite z-scores.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution};
use std::collections::HashMap;

pub const DEFAULT_MEAN: f64 = 0.5;
pub const DEFAULT_STD: f64 = 1.0;

const MIN_STD: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: f64,
    pub std: f64,
    pub count: u64,
}

impl Default for FeatureStats {
    fn default() -> Self {
        Self {
            mean: DEFAULT_MEAN,
            std: DEFAULT_STD,
            count: 0,
        }
    }
}

impl FeatureStats {
    pub fn new(mean: f64, std: f64) -> Self {
        Self {
            mean,
            std,
            count: 0,
        }
    }

    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }
}

/// Welford accumulator, so updates are O(1) and numerically stable
#[derive(Debug, Clone, Copy, Default)]
struct RunningMoments {
    count: u64,
    mean: f64,
    m2: f64,
    /// Explicitly seeded stats win over the accumulator until the next observation
    seeded: Option<FeatureStats>,
}

impl RunningMoments {
    fn push(&mut self, value: f64) {
        if let Some(seed) = self.seeded.take() {
            // Continue from the seed as if it came from `max(count, 2)` samples
            self.count = seed.count.max(2);
            self.mean = seed.mean;
            self.m2 = seed.std * seed.std * (self.count - 1) as f64;
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn stats(&self) -> Option<FeatureStats> {
        if let Some(seed) = self.seeded {
            return Some(seed);
        }
        if self.count < 2 {
            return None;
        }
        // Sample standard deviation, matching statrs `std_dev`
        let std = (self.m2 / (self.count - 1) as f64).sqrt();
        Some(FeatureStats {
            mean: self.mean,
            std,
            count: self.count,
        })
    }
}

/// Thread-safe table of feature statistics
#[derive(Debug, Default)]
pub struct FeatureStatistics {
    table: RwLock<HashMap<String, RunningMoments>>,
}

impl FeatureStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observed value into the running mean / std for `name`.
    pub fn observe(&self, name: &str, value: f64) {
        if !value.is_finite() {
            return;
        }
        let mut table = self.table.write();
        table.entry(name.to_string()).or_default().push(value);
    }

    /// Replace the statistics for `name` with ones computed from `samples`.
    pub fn observe_samples(&self, name: &str, samples: &[f64]) {
        let finite: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.len() < 2 {
            for value in finite {
                self.observe(name, value);
            }
            return;
        }

        let count = finite.len() as u64;
        let data = Data::new(finite);
        let (Some(mean), Some(std)) = (data.mean(), data.std_dev()) else {
            return;
        };

        self.record(name, FeatureStats { mean, std, count });
    }

    /// Seed explicit statistics for `name`.
    pub fn record(&self, name: &str, stats: FeatureStats) {
        let mut table = self.table.write();
        table.insert(
            name.to_string(),
            RunningMoments {
                seeded: Some(stats),
                ..RunningMoments::default()
            },
        );
    }

    /// Statistics used for normalization; defaults when nothing usable is recorded.
    pub fn stats_for(&self, name: &str) -> FeatureStats {
        self.table
            .read()
            .get(name)
            .and_then(RunningMoments::stats)
            .filter(|s| s.std.is_finite() && s.std > MIN_STD && s.mean.is_finite())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}
