//! Training job
//!
//! Reads the train/test transaction and identity CSVs, trains the grouped
//! K-fold ensemble, writes the model artifact and a submission file of
//! averaged test predictions.

use anyhow::{Context, Result};
use fraud_scoring::{
    config::AppConfig,
    dataset::{read_rows, take_labels, write_submission},
    models::{BoostedTreesLearner, EnsembleTrainer},
    pipeline::{run_training, FeaturePipeline, TrainingInputs},
    types::record::{parse_identities, parse_transactions},
};
use std::time::Instant;
use tracing::info;

fn main() -> Result<()> {
    let config = AppConfig::load()?;
    config.logging.init_tracing()?;

    let training = &config.training;
    info!(
        data_dir = %training.data_dir.display(),
        folds = training.n_folds,
        seed = training.learner.seed,
        "Starting training job"
    );
    let started = Instant::now();

    let mut train_rows = read_rows(training.data_file(&training.train_transaction))
        .context("Failed to read training transactions")?;
    let labels = take_labels(&mut train_rows, &training.label_column)
        .context("Failed to read training labels")?;
    let positives = labels.iter().filter(|&&y| y == 1).count();
    info!(rows = labels.len(), positives = positives, "Labels loaded");

    let inputs = TrainingInputs {
        train_transactions: parse_transactions(train_rows).context("Invalid training transactions")?,
        train_identities: parse_identities(
            read_rows(training.data_file(&training.train_identity)).context("Failed to read training identities")?,
        )
        .context("Invalid training identities")?,
        labels,
        test_transactions: parse_transactions(
            read_rows(training.data_file(&training.test_transaction)).context("Failed to read test transactions")?,
        )
        .context("Invalid test transactions")?,
        test_identities: parse_identities(
            read_rows(training.data_file(&training.test_identity)).context("Failed to read test identities")?,
        )
        .context("Invalid test identities")?,
    };

    let pipeline = FeaturePipeline::from_config(training);
    let trainer = EnsembleTrainer::new(
        BoostedTreesLearner::new(training.learner.clone()),
        training.n_folds,
        training.stopping_fraction,
    );
    let run = run_training(&pipeline, &trainer, &inputs).context("Training failed")?;

    info!(
        oof_auc = ?run.artifact.metadata.oof_auc,
        fold_auc = ?run.artifact.metadata.fold_auc,
        best_iterations = ?run.artifact.metadata.best_iterations,
        features = run.artifact.features.len(),
        "Ensemble trained"
    );

    run.artifact
        .save(&config.model.artifact_path)
        .context("Failed to write model artifact")?;
    write_submission(&training.submission_path, &run.holdout_ids, &run.holdout)
        .context("Failed to write submission")?;

    info!(
        elapsed_secs = started.elapsed().as_secs(),
        artifact = %config.model.artifact_path.display(),
        submission = %training.submission_path.display(),
        "Training job finished"
    );
    Ok(())
}
