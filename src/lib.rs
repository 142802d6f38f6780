//! Fraud Scoring Library
//!
//! Feature engineering, grouped K-fold ensemble training and live scoring
//! of card transactions, with a NATS request/reply front end.

pub mod config;
pub mod consumer;
pub mod dataset;
pub mod error;
pub mod features;
pub mod frame;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod scoring;
pub mod state;
pub mod types;

pub use config::AppConfig;
pub use consumer::RequestConsumer;
pub use error::{ArtifactError, DatasetError, IngestError, MergeError, ScoringError, TrainingError};
pub use frame::{FeatureFrame, FeatureMatrix, FeatureSchema};
pub use models::{BoostedTrees, BoostedTreesLearner, EnsembleTrainer, ModelArtifact, Predictor, TreeLearner};
pub use producer::ResultProducer;
pub use scoring::{ScoreOutcome, ScoringAdapter, ScoringWarning};
pub use state::ModelState;
pub use types::{HealthStatus, PredictionResult, ScoreRequest, ScoreResponse};
