//! Scoring adapter.
//!
//! Turns a raw request batch into per-row fraud probabilities using a
//! loaded artifact. Only a malformed transaction batch fails the request.
//! Identity problems fall back to the minimal feature set, unseen
//! categories fall back to the default code, and features the batch
//! cannot provide are filled from the artifact schema.

use crate::error::ScoringError;
use crate::features::base::BaseFeatureBuilder;
use crate::features::encoder::apply_encoders;
use crate::features::normalizer::normalize;
use crate::frame::{FeatureFrame, FeatureMatrix, FeatureSchema};
use crate::models::aggregator::FoldAggregator;
use crate::models::artifact::ModelArtifact;
use crate::models::learner::{BoostedTrees, Predictor};
use crate::types::prediction::{PredictionResult, ScoreRequest};
use crate::types::record::{parse_identities, parse_transactions, IdentityRecord, TransactionRecord};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default decision threshold, below 0.5 to favour recall.
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Recovered problems reported alongside the scores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoringWarning {
    /// The column was scored with the default code throughout.
    UnseenCategory { column: String, value: String },
    /// The batch was scored on the minimal feature set.
    DegradedFeatures { reason: String },
}

impl fmt::Display for ScoringWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringWarning::UnseenCategory { column, value } => {
                write!(f, "unseen value {value:?} in column {column}, default encoding used")
            }
            ScoringWarning::DegradedFeatures { reason } => {
                write!(f, "scored on minimal features: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoreOutcome {
    /// One result per input transaction, in input order
    pub results: Vec<PredictionResult>,
    pub warnings: Vec<ScoringWarning>,
    pub degraded: bool,
    /// Mean over rows of the fold models' standard deviation
    pub fold_spread: f64,
}

impl ScoreOutcome {
    pub fn flagged(&self) -> usize {
        self.results.iter().filter(|r| r.is_fraud).count()
    }

    pub fn unseen_columns(&self) -> impl Iterator<Item = &str> {
        self.warnings.iter().filter_map(|w| match w {
            ScoringWarning::UnseenCategory { column, .. } => Some(column.as_str()),
            _ => None,
        })
    }
}

pub struct ScoringAdapter<M = BoostedTrees> {
    artifact: Arc<ModelArtifact<M>>,
    schema: FeatureSchema,
    builder: BaseFeatureBuilder,
    threshold: f64,
}

impl<M: Predictor> ScoringAdapter<M> {
    pub fn new(artifact: Arc<ModelArtifact<M>>, threshold: f64) -> Self {
        let schema = artifact.schema();
        Self {
            artifact,
            schema,
            builder: BaseFeatureBuilder::new(),
            threshold,
        }
    }

    pub fn artifact(&self) -> &ModelArtifact<M> {
        &self.artifact
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Validate and score a transport request.
    pub fn score(&self, request: ScoreRequest) -> Result<ScoreOutcome, ScoringError> {
        let transactions = parse_transactions(request.transactions)?;

        let mut parse_warning = None;
        let identities = match request.identities.map(parse_identities) {
            Some(Ok(identities)) => Some(identities),
            Some(Err(e)) => {
                warn!(error = %e, "Identity rows rejected");
                parse_warning = Some(format!("identity rows rejected: {e}"));
                None
            }
            None => None,
        };

        let mut outcome = self.score_records(&transactions, identities.as_deref());
        if let Some(reason) = parse_warning {
            outcome.warnings.retain(|w| !matches!(w, ScoringWarning::DegradedFeatures { .. }));
            outcome.warnings.insert(0, ScoringWarning::DegradedFeatures { reason });
        }
        Ok(outcome)
    }

    /// Score already parsed records. `None` identities selects the
    /// minimal feature set.
    pub fn score_records(
        &self,
        transactions: &[TransactionRecord],
        identities: Option<&[IdentityRecord]>,
    ) -> ScoreOutcome {
        if transactions.is_empty() {
            return ScoreOutcome::default();
        }

        let mut warnings = Vec::new();
        let (frame, degraded) = match identities {
            None => {
                warnings.push(ScoringWarning::DegradedFeatures {
                    reason: "no identity data supplied".to_string(),
                });
                (self.builder.build_minimal(transactions), true)
            }
            Some(identities) => match self.builder.build(transactions, identities) {
                Ok(frame) => (frame, false),
                Err(e) => {
                    warn!(error = %e, "Identity merge failed, scoring on minimal features");
                    warnings.push(ScoringWarning::DegradedFeatures { reason: e.to_string() });
                    (self.builder.build_minimal(transactions), true)
                }
            },
        };

        let matrix = self.build_matrix(frame, &mut warnings);
        let per_fold: Vec<Vec<f64>> = self.artifact.models.iter().map(|m| m.predict(&matrix)).collect();
        let probabilities = FoldAggregator::aggregate(&per_fold);
        let spread = FoldAggregator::spread(&per_fold);
        let fold_spread = if spread.is_empty() {
            0.0
        } else {
            spread.iter().sum::<f64>() / spread.len() as f64
        };

        let results = transactions
            .iter()
            .zip(probabilities)
            .map(|(tx, p)| PredictionResult::new(tx.transaction_id.clone(), tx.amount, p, self.threshold))
            .collect();

        ScoreOutcome {
            results,
            warnings,
            degraded,
            fold_spread,
        }
    }

    /// Encode, normalise and reconcile a built frame to the artifact's
    /// feature layout.
    pub fn build_matrix(&self, mut frame: FeatureFrame, warnings: &mut Vec<ScoringWarning>) -> FeatureMatrix {
        for unseen in apply_encoders(&self.artifact.encoders, &mut frame) {
            warnings.push(ScoringWarning::UnseenCategory {
                column: unseen.column,
                value: unseen.value,
            });
        }

        let frame = normalize(frame);
        let absent = self.schema.missing_from(&frame);
        if !absent.is_empty() {
            debug!(
                absent = absent.len(),
                first = ?absent.iter().take(10).collect::<Vec<_>>(),
                "Features absent from batch, using neutral default"
            );
        }
        frame.to_matrix(&self.schema)
    }
}
