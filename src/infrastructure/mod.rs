pub mod config_store;
pub mod mock;
pub mod observability;

pub use config_store::{InMemoryConfigStore, JsonFileConfigStore};
pub use mock::{RecordingMetricsSink, SimulatedModelRunner, StaticModelMetrics};
pub use observability::Metrics;
