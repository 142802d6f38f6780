//! Configuration management for the scoring service and training job

use crate::models::learner::LearnerParams;
use crate::scoring::DEFAULT_THRESHOLD;
use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_ENV: &str = "FRAUD_SCORING_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub model: ModelConfig,
    pub scoring: ScoringConfig,
    pub training: TrainingConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Request/reply subject for score requests
    pub score_subject: String,
    /// Request/reply subject for health probes
    pub health_subject: String,
    /// Subject every score response is also published to
    pub result_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            score_subject: "fraud.score".to_string(),
            health_subject: "fraud.health".to_string(),
            result_subject: "fraud.results".to_string(),
        }
    }
}

/// Model artifact configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Artifact written by the training job
    pub artifact_path: PathBuf,
    /// Refuse to start when the artifact cannot be loaded
    pub require_loaded: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            artifact_path: PathBuf::from("models/artifact.json"),
            require_loaded: false,
        }
    }
}

/// Scoring configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Rows with probability strictly above this are flagged
    pub threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Training job configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub data_dir: PathBuf,
    pub train_transaction: String,
    pub train_identity: String,
    pub test_transaction: String,
    pub test_identity: String,
    pub label_column: String,
    /// Averaged held-out predictions, one row per test transaction
    pub submission_path: PathBuf,
    pub n_folds: usize,
    /// Latest share of each fold's training rows used for early stopping
    pub stopping_fraction: f64,
    pub group_keys: Vec<String>,
    pub numeric_columns: Vec<String>,
    /// Frequency-encoded columns; empty means every categorical column
    pub frequency_columns: Vec<String>,
    /// Columns kept out of the feature list besides the row identifier
    pub drop_columns: Vec<String>,
    pub learner: LearnerParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            train_transaction: "train_transaction.csv".to_string(),
            train_identity: "train_identity.csv".to_string(),
            test_transaction: "test_transaction.csv".to_string(),
            test_identity: "test_identity.csv".to_string(),
            label_column: "isFraud".to_string(),
            submission_path: PathBuf::from("models/submission.csv"),
            n_folds: 5,
            stopping_fraction: 0.1,
            group_keys: ["card1", "card2", "card3", "card5", "P_emaildomain", "DeviceName", "addr1"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            numeric_columns: ["TransactionAmt", "TransactionAmt_log1p", "DT_D"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            frequency_columns: Vec::new(),
            drop_columns: vec!["TransactionDT".to_string()],
            learner: LearnerParams::default(),
        }
    }
}

impl TrainingConfig {
    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum concurrently processed requests
    pub workers: usize,
    /// Seconds between metrics summaries
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            metrics_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber. `RUST_LOG` wins over the configured level.
    pub fn init_tracing(&self) -> Result<()> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(format!("fraud_scoring={}", self.level))
                .with_context(|| format!("Invalid log level {:?}", self.level))?,
        };

        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        let installed = if self.format == "json" {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
    }
}

impl AppConfig {
    /// Load configuration from `FRAUD_SCORING_CONFIG` or the default path
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path, with `FRAUD_SCORING__<SECTION>__<KEY>`
    /// environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("FRAUD_SCORING").prefix_separator("__").separator("__"))
            .build()
            .with_context(|| format!("Failed to build configuration from {}", path.as_ref().display()))?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
