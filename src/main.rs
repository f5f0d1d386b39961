//! sureodds - ensemble prediction engine CLI
//!
//! Runs the engine against the simulated model runner and in-process
//! collaborators. Weights and risk profiles persist in a JSON config store.
//!
//! # Usage
//! ```sh
//! sureodds predict --input outputs.json --profile moderate
//! sureodds explain --feature form=0.7 --feature odds_drift=0.4 --profile aggressive
//! sureodds weights historical:0.5,market:0.3
//! sureodds metrics
//! ```
//!
//! # Environment Variables
//! - `SUREODDS_CONFIG` - Optional TOML config file
//! - `LOG_JSON` - Emit logs as JSON lines (default: false)
//! - `METRICS_ENABLED` - Print Prometheus metrics after each command (default: true)

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sureodds::application::ensemble::{EngineServices, PredictionEngine};
use sureodds::config::{EngineConfig, ObservabilityEnvConfig};
use sureodds::domain::ports::ConfigStore;
use sureodds::domain::prediction::types::{
    FeatureMap, ModelOutput, ModelWeight, PredictionContext, RiskProfile,
};
use sureodds::infrastructure::{
    InMemoryConfigStore, JsonFileConfigStore, Metrics, SimulatedModelRunner, StaticModelMetrics,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config store for weights / risk profiles (default: ~/.sureodds/config.json)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Keep weights / risk profiles in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Combine pre-computed model outputs (JSON array) into a final prediction
    Predict {
        /// Path to a JSON file with model outputs; `-` reads stdin
        #[arg(short, long)]
        input: String,

        #[arg(short, long, default_value = "moderate")]
        profile: String,

        /// Request id attached to errors and logs
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Run every model on a feature vector and explain the result
    Explain {
        /// Feature as name=value (repeatable)
        #[arg(short, long = "feature", value_parser = parse_feature)]
        features: Vec<(String, f64)>,

        #[arg(short, long, default_value = "moderate")]
        profile: String,

        /// Overall deadline for the model fan-out
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
    /// Update model weights, e.g. `historical:0.5,market:0.3`
    Weights { weights: String },
    /// Add or update a risk profile multiplier
    Profile { name: String, multiplier: f64 },
    /// Print engine configuration metrics
    Metrics,
}

fn parse_feature(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid value for {}: {}", name, e))?;
    Ok((name.trim().to_string(), value))
}

fn init_tracing(config: &ObservabilityEnvConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn config_store(cli: &Cli) -> Result<Arc<dyn ConfigStore>> {
    if cli.ephemeral {
        return Ok(Arc::new(InMemoryConfigStore::new()));
    }
    let store = match &cli.store {
        Some(path) => JsonFileConfigStore::new(path)?,
        None => JsonFileConfigStore::in_home()?,
    };
    info!("Using config store {:?}", store.path());
    Ok(Arc::new(store))
}

fn read_outputs(input: &str) -> Result<Vec<ModelOutput>> {
    let content = if input == "-" {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))?
    };
    serde_json::from_str(&content).context("Failed to parse model outputs JSON")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let observability = ObservabilityEnvConfig::from_env();
    init_tracing(&observability);

    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    let metrics = Arc::new(Metrics::new()?);

    let services = EngineServices {
        metrics: metrics.clone(),
        config_store: config_store(&cli)?,
        model_metrics: Arc::new(StaticModelMetrics::simulated()),
        model_runner: Arc::new(SimulatedModelRunner::new()),
    };
    let engine = PredictionEngine::new(config, services)?;

    match cli.command {
        Commands::Predict {
            input,
            profile,
            request_id,
        } => {
            let outputs = read_outputs(&input)?;
            let mut context = PredictionContext::new().with_attribute("source", "cli");
            if let Some(id) = request_id {
                context = context.with_request_id(id);
            }

            let prediction = engine.generate_prediction(&outputs, &profile, context)?;
            if !engine.validate_prediction(&prediction) {
                return Err(anyhow!("Prediction {} failed validation", prediction.id));
            }
            print_json(&prediction)?;
        }
        Commands::Explain {
            features,
            profile,
            deadline_ms,
        } => {
            let features: FeatureMap = features.into_iter().collect();
            engine.observe_features(&features);

            let explained = engine
                .generate_prediction_with_explanation_within(
                    &features,
                    &profile,
                    deadline_ms.map(Duration::from_millis),
                    PredictionContext::new().with_attribute("source", "cli"),
                )
                .await?;
            print_json(&explained)?;
        }
        Commands::Weights { weights } => {
            let weights: Vec<ModelWeight> = EngineConfig::parse_model_weights(&weights)?
                .into_iter()
                .map(|(model, weight)| ModelWeight::new(model, weight))
                .collect();
            engine.update_model_weights(&weights)?;
            print_json(&engine.snapshot().model_weights)?;
        }
        Commands::Profile { name, multiplier } => {
            engine.update_risk_profiles(&[RiskProfile::new(name, multiplier)])?;
            print_json(&engine.snapshot().risk_multipliers())?;
        }
        Commands::Metrics => {
            print_json(&engine.get_engine_metrics())?;
        }
    }

    if observability.metrics_enabled {
        eprintln!("{}", metrics.render());
    }

    Ok(())
}
