//! Error types for the scoring core.
//!
//! Only ingest-shape problems and a missing model are hard failures for a
//! scoring request. Unseen categories, schema gaps and identity merge
//! problems are recovered inside the pipeline and never surface here.

use thiserror::Error;

/// Problems with the shape of an ingested record batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("missing required columns: {0:?}")]
    MissingColumns(Vec<String>),
    #[error("row {row}: column {column} has invalid value {value:?}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
}

/// Failures of the identity left join.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("identity records contain TransactionID {0} more than once")]
    DuplicateIdentity(String),
    #[error("identity column {0} collides with a transaction column")]
    ColumnConflict(String),
}

/// Errors raised by a scoring request.
#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("invalid input batch: {0}")]
    Ingest(#[from] IngestError),
    #[error("model artifact is not loaded: {0}")]
    ModelNotLoaded(String),
}

/// Errors raised while training the fold ensemble.
#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("cannot split {groups} distinct groups into {folds} folds")]
    NotEnoughGroups { groups: usize, folds: usize },
    #[error("need at least 2 folds, got {0}")]
    InvalidFoldCount(usize),
    #[error("length mismatch: {what} has {actual} rows, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        actual: usize,
        expected: usize,
    },
    #[error("fold {0} has no training rows left after the early-stopping split")]
    EmptyTrainingFold(usize),
    #[error("training matrix has no rows")]
    EmptyTrainingSet,
    #[error("required column {0} missing from training frame")]
    MissingColumn(String),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// Errors raised while persisting or loading a model artifact.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Artifact integrity error: {0}")]
    Integrity(String),
}

/// Errors raised while reading training data files.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: label column {column} is missing or not 0/1")]
    InvalidLabel { row: usize, column: String },
    #[error(transparent)]
    Ingest(#[from] IngestError),
}
