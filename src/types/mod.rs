//! Type definitions for the fraud scoring pipeline

pub mod prediction;
pub mod record;

pub use prediction::{HealthStatus, PredictionResult, ScoreRequest, ScoreResponse};
pub use record::{FieldValue, IdentityRecord, RawRow, TransactionRecord};
