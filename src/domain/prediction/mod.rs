pub mod feature_stats;
pub mod types;

pub use feature_stats::{FeatureStatistics, FeatureStats};
pub use types::*;
