//! Training-time feature pipeline and job orchestration.
//!
//! Both populations go through the same stages: base features, categorical
//! encoders fit over their union, frequency encodings and group statistics
//! over their union, normalisation, and finally a shared feature layout
//! taken from the training frame.

use crate::config::TrainingConfig;
use crate::error::TrainingError;
use crate::features::augment::UnsupervisedAugmenter;
use crate::features::base::{BaseFeatureBuilder, DAY_INDEX, MONTH_BLOCK};
use crate::features::encoder::{Encoder, DEFAULT_CODE};
use crate::features::normalizer::normalize;
use crate::frame::{Column, FeatureFrame, FeatureMatrix, FeatureSchema};
use crate::models::artifact::{ArtifactMetadata, ModelArtifact};
use crate::models::ensemble::{EnsembleTrainer, TrainingData};
use crate::models::learner::TreeLearner;
use crate::types::record::{IdentityRecord, TransactionRecord};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Parsed records for both populations.
#[derive(Debug, Clone, Default)]
pub struct TrainingInputs {
    pub train_transactions: Vec<TransactionRecord>,
    pub train_identities: Vec<IdentityRecord>,
    pub labels: Vec<u8>,
    pub test_transactions: Vec<TransactionRecord>,
    pub test_identities: Vec<IdentityRecord>,
}

/// Model-ready matrices plus what the artifact and the fold split need.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub train: FeatureMatrix,
    pub test: FeatureMatrix,
    pub encoders: BTreeMap<String, Encoder>,
    /// Month block per training row, the fold grouping key
    pub groups: Vec<i64>,
    /// Day index per training row, orders the early-stopping slice
    pub time: Vec<f64>,
    pub test_ids: Vec<String>,
}

pub struct FeaturePipeline {
    builder: BaseFeatureBuilder,
    augmenter: UnsupervisedAugmenter,
    frequency_columns: Vec<String>,
    drop_columns: Vec<String>,
}

impl FeaturePipeline {
    pub fn new(
        augmenter: UnsupervisedAugmenter,
        frequency_columns: Vec<String>,
        drop_columns: Vec<String>,
    ) -> Self {
        Self {
            builder: BaseFeatureBuilder::new(),
            augmenter,
            frequency_columns,
            drop_columns,
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(
            UnsupervisedAugmenter::new(config.group_keys.clone(), config.numeric_columns.clone()),
            config.frequency_columns.clone(),
            config.drop_columns.clone(),
        )
    }

    pub fn prepare(&self, inputs: &TrainingInputs) -> Result<PreparedData, TrainingError> {
        if inputs.train_transactions.is_empty() {
            return Err(TrainingError::EmptyTrainingSet);
        }

        let mut train = self
            .builder
            .build(&inputs.train_transactions, &inputs.train_identities)?;
        let mut test = self
            .builder
            .build(&inputs.test_transactions, &inputs.test_identities)?;
        info!(
            train_rows = train.n_rows(),
            train_cols = train.n_cols(),
            test_rows = test.n_rows(),
            test_cols = test.n_cols(),
            "Base features built"
        );

        let encoders = fit_encoders(&mut train, &mut test);
        info!(encoders = encoders.len(), "Categorical encoders fitted");

        let frequency_columns = if self.frequency_columns.is_empty() {
            encoders.keys().cloned().collect()
        } else {
            self.frequency_columns.clone()
        };
        self.augmenter.augment(&mut train, &mut test, &frequency_columns);

        let train = normalize(train);
        let test = normalize(test);

        let groups = numeric_column(&train, MONTH_BLOCK)?
            .into_iter()
            .map(|v| v as i64)
            .collect();
        let time = numeric_column(&train, DAY_INDEX)?;

        let schema = FeatureSchema::from_frame(&train, &self.drop_columns);
        info!(features = schema.len(), "Feature layout fixed");

        Ok(PreparedData {
            train: train.to_matrix(&schema),
            test: test.to_matrix(&schema),
            encoders,
            groups,
            time,
            test_ids: test.row_ids().to_vec(),
        })
    }
}

/// Fit one encoder per categorical column and encode both frames.
///
/// A column is categorical when either frame stores it as text. When only
/// one frame has the column, the encoder also knows the missing token and
/// the other frame gets the default code throughout.
pub fn fit_encoders(train: &mut FeatureFrame, test: &mut FeatureFrame) -> BTreeMap<String, Encoder> {
    let columns: BTreeSet<String> = train
        .text_columns()
        .into_iter()
        .chain(test.text_columns())
        .collect();

    let mut encoders = BTreeMap::new();
    for name in columns {
        let missing = Column::missing_text(1);
        let encoder = match (train.column(&name), test.column(&name)) {
            (Some(a), Some(b)) => Encoder::fit(a, b),
            (Some(a), None) => Encoder::fit(a, &missing),
            (None, Some(b)) => Encoder::fit(&missing, b),
            (None, None) => continue,
        };
        debug!(column = %name, classes = encoder.len(), "Encoder fitted");

        for frame in [&mut *train, &mut *test] {
            let codes = frame
                .column(&name)
                .and_then(|column| encoder.apply(column).ok())
                .unwrap_or_else(|| vec![DEFAULT_CODE; frame.n_rows()]);
            frame.set_column(&name, Column::I64(codes));
        }
        encoders.insert(name, encoder);
    }
    encoders
}

fn numeric_column(frame: &FeatureFrame, name: &str) -> Result<Vec<f64>, TrainingError> {
    let column = frame
        .column(name)
        .ok_or_else(|| TrainingError::MissingColumn(name.to_string()))?;
    Ok((0..frame.n_rows())
        .map(|row| column.value_f64(row).unwrap_or(f64::NAN))
        .collect())
}

/// Everything a finished training job produces.
#[derive(Debug, Clone)]
pub struct TrainingRun<M> {
    pub artifact: ModelArtifact<M>,
    pub oof: Vec<f64>,
    pub holdout_ids: Vec<String>,
    pub holdout: Vec<f64>,
}

/// Prepare features, train the fold ensemble and assemble the artifact.
pub fn run_training<L: TreeLearner>(
    pipeline: &FeaturePipeline,
    trainer: &EnsembleTrainer<L>,
    inputs: &TrainingInputs,
) -> Result<TrainingRun<L::Model>, TrainingError> {
    let prepared = pipeline.prepare(inputs)?;
    if inputs.labels.len() != prepared.train.n_rows() {
        return Err(TrainingError::LengthMismatch {
            what: "labels",
            actual: inputs.labels.len(),
            expected: prepared.train.n_rows(),
        });
    }

    let outcome = trainer.train(
        TrainingData {
            features: &prepared.train,
            labels: &inputs.labels,
            groups: &prepared.groups,
            time: &prepared.time,
        },
        Some(&prepared.test),
    )?;

    let metadata = ArtifactMetadata {
        oof_auc: outcome.oof_auc,
        fold_auc: outcome.fold_auc.clone(),
        best_iterations: outcome.best_iterations(),
        ..ArtifactMetadata::new(outcome.models.len())
    };

    Ok(TrainingRun {
        artifact: ModelArtifact {
            models: outcome.models,
            features: prepared.train.feature_names().to_vec(),
            encoders: prepared.encoders,
            metadata,
        },
        oof: outcome.oof,
        holdout_ids: prepared.test_ids,
        holdout: outcome.holdout.unwrap_or_default(),
    })
}
