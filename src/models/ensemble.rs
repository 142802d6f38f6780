//! Grouped K-fold ensemble training.
//!
//! Rows are split into folds by a group key (the monthly time block) so no
//! block is on both sides of a split. Each fold trains one model on the
//! other folds, with the latest-in-time slice of those rows held back as
//! the early-stopping set. The fold's own rows get out-of-fold scores and
//! every model scores the held-out population; those scores are averaged.

use crate::error::TrainingError;
use crate::frame::FeatureMatrix;
use crate::models::aggregator::FoldAggregator;
use crate::models::evaluation::roc_auc;
use crate::models::learner::{LabeledMatrix, Predictor, TreeLearner};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Assign every row a fold index in `0..n_folds` so that all rows of a
/// group share a fold.
///
/// Groups are taken largest first (ties by group value) and each goes to
/// the fold with the fewest rows so far.
pub fn group_k_fold(groups: &[i64], n_folds: usize) -> Result<Vec<usize>, TrainingError> {
    if n_folds < 2 {
        return Err(TrainingError::InvalidFoldCount(n_folds));
    }

    let mut sizes: BTreeMap<i64, usize> = BTreeMap::new();
    for &g in groups {
        *sizes.entry(g).or_insert(0) += 1;
    }
    if sizes.len() < n_folds {
        return Err(TrainingError::NotEnoughGroups {
            groups: sizes.len(),
            folds: n_folds,
        });
    }

    let mut ordered: Vec<(i64, usize)> = sizes.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut fold_sizes = vec![0usize; n_folds];
    let mut fold_of_group: BTreeMap<i64, usize> = BTreeMap::new();
    for (group, size) in ordered {
        let (fold, _) = fold_sizes
            .iter()
            .enumerate()
            .min_by_key(|&(i, &s)| (s, i))
            .unwrap_or((0, &0));
        fold_sizes[fold] += size;
        fold_of_group.insert(group, fold);
    }

    Ok(groups.iter().map(|g| fold_of_group[g]).collect())
}

/// Average probability of every model, row by row.
pub fn ensemble_predict<M: Predictor>(models: &[M], features: &FeatureMatrix) -> Vec<f64> {
    let per_fold: Vec<Vec<f64>> = models.iter().map(|m| m.predict(features)).collect();
    FoldAggregator::aggregate(&per_fold)
}

/// Inputs for one training run. `groups` drives the fold split and
/// `time` orders rows for the early-stopping slice.
#[derive(Debug, Clone, Copy)]
pub struct TrainingData<'a> {
    pub features: &'a FeatureMatrix,
    pub labels: &'a [u8],
    pub groups: &'a [i64],
    pub time: &'a [f64],
}

#[derive(Debug, Clone)]
pub struct EnsembleOutcome<M> {
    pub models: Vec<M>,
    /// Out-of-fold probability for every training row
    pub oof: Vec<f64>,
    /// `None` where the validation fold holds a single class
    pub fold_auc: Vec<Option<f64>>,
    pub oof_auc: Option<f64>,
    /// Averaged probabilities for the held-out population, if one was given
    pub holdout: Option<Vec<f64>>,
}

impl<M: Predictor> EnsembleOutcome<M> {
    pub fn best_iterations(&self) -> Vec<usize> {
        self.models.iter().map(Predictor::best_iteration).collect()
    }
}

pub struct EnsembleTrainer<L> {
    learner: L,
    n_folds: usize,
    stopping_fraction: f64,
}

impl<L: TreeLearner> EnsembleTrainer<L> {
    pub fn new(learner: L, n_folds: usize, stopping_fraction: f64) -> Self {
        Self {
            learner,
            n_folds,
            stopping_fraction: stopping_fraction.clamp(0.0, 0.9),
        }
    }

    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    pub fn train(
        &self,
        data: TrainingData<'_>,
        holdout: Option<&FeatureMatrix>,
    ) -> Result<EnsembleOutcome<L::Model>, TrainingError> {
        let n = data.features.n_rows();
        if n == 0 {
            return Err(TrainingError::EmptyTrainingSet);
        }
        for (what, len) in [
            ("labels", data.labels.len()),
            ("groups", data.groups.len()),
            ("time", data.time.len()),
        ] {
            if len != n {
                return Err(TrainingError::LengthMismatch {
                    what,
                    actual: len,
                    expected: n,
                });
            }
        }

        let folds = group_k_fold(data.groups, self.n_folds)?;
        let mut oof = vec![f64::NAN; n];
        let mut models = Vec::with_capacity(self.n_folds);
        let mut fold_auc = Vec::with_capacity(self.n_folds);
        let mut holdout_scores = Vec::new();

        for fold in 0..self.n_folds {
            let valid_rows: Vec<usize> = (0..n).filter(|&i| folds[i] == fold).collect();
            let (fit_rows, stop_rows) = self.split_stopping(&folds, fold, data.time);
            if fit_rows.is_empty() {
                return Err(TrainingError::EmptyTrainingFold(fold));
            }

            info!(
                fold = fold,
                train_rows = fit_rows.len(),
                stopping_rows = stop_rows.len(),
                valid_rows = valid_rows.len(),
                "Training fold"
            );

            let fit_x = data.features.select_rows(&fit_rows);
            let fit_y = pick(data.labels, &fit_rows);
            let stop_x = data.features.select_rows(&stop_rows);
            let stop_y = pick(data.labels, &stop_rows);
            let model = self
                .learner
                .fit(LabeledMatrix::new(&fit_x, &fit_y), LabeledMatrix::new(&stop_x, &stop_y))?;

            let valid_x = data.features.select_rows(&valid_rows);
            let valid_pred = model.predict(&valid_x);
            for (&row, &p) in valid_rows.iter().zip(&valid_pred) {
                oof[row] = p;
            }

            let auc = roc_auc(&pick(data.labels, &valid_rows), &valid_pred);
            match auc {
                Some(auc) => info!(fold = fold, auc = auc, best_iteration = model.best_iteration(), "Fold done"),
                None => warn!(fold = fold, "Validation fold holds a single class, AUC undefined"),
            }
            fold_auc.push(auc);

            if let Some(x) = holdout {
                holdout_scores.push(model.predict(x));
            }
            models.push(model);
        }

        let oof_auc = roc_auc(data.labels, &oof);
        if let Some(auc) = oof_auc {
            info!(oof_auc = auc, folds = self.n_folds, "Out-of-fold evaluation");
        }

        let holdout = holdout.map(|_| {
            let spread = FoldAggregator::spread(&holdout_scores);
            if !spread.is_empty() {
                let mean_spread = spread.iter().sum::<f64>() / spread.len() as f64;
                info!(mean_spread = mean_spread, "Fold agreement on held-out rows");
            }
            FoldAggregator::aggregate(&holdout_scores)
        });

        Ok(EnsembleOutcome {
            models,
            oof,
            fold_auc,
            oof_auc,
            holdout,
        })
    }

    /// Rows outside `fold`, split into (fit, stopping) with the stopping
    /// set being the latest `stopping_fraction` of them by time.
    fn split_stopping(&self, folds: &[usize], fold: usize, time: &[f64]) -> (Vec<usize>, Vec<usize>) {
        let mut rows: Vec<usize> = (0..folds.len()).filter(|&i| folds[i] != fold).collect();
        rows.sort_by(|&a, &b| time[a].total_cmp(&time[b]).then(a.cmp(&b)));

        let n_stop = (rows.len() as f64 * self.stopping_fraction).floor() as usize;
        let stop_rows = rows.split_off(rows.len() - n_stop);
        rows.sort_unstable();
        (rows, stop_rows)
    }
}

fn pick(labels: &[u8], rows: &[usize]) -> Vec<u8> {
    rows.iter().map(|&r| labels[r]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::learner::{BoostedTreesLearner, LearnerParams};
    use std::cell::RefCell;

    /// Predicts the training positive rate for every row.
    #[derive(Debug)]
    struct MeanLearner;

    #[derive(Debug)]
    struct MeanModel(f64);

    impl Predictor for MeanModel {
        fn predict(&self, features: &FeatureMatrix) -> Vec<f64> {
            vec![self.0; features.n_rows()]
        }

        fn best_iteration(&self) -> usize {
            1
        }
    }

    impl TreeLearner for MeanLearner {
        type Model = MeanModel;

        fn fit(&self, train: LabeledMatrix<'_>, _stopping: LabeledMatrix<'_>) -> Result<MeanModel, TrainingError> {
            let pos = train.labels.iter().filter(|&&y| y == 1).count();
            Ok(MeanModel(pos as f64 / train.labels.len() as f64))
        }
    }

    /// Records the rows each fit call saw (read back from a `row` feature)
    /// and answers with a constant unique to that call.
    #[derive(Debug, Default)]
    struct RecordingLearner {
        calls: RefCell<Vec<(Vec<usize>, Vec<usize>)>>,
    }

    #[derive(Debug)]
    struct ConstantModel(f64);

    impl Predictor for ConstantModel {
        fn predict(&self, features: &FeatureMatrix) -> Vec<f64> {
            vec![self.0; features.n_rows()]
        }

        fn best_iteration(&self) -> usize {
            1
        }
    }

    fn row_ids(features: &FeatureMatrix) -> Vec<usize> {
        features.column(0).iter().map(|&v| v as usize).collect()
    }

    impl TreeLearner for RecordingLearner {
        type Model = ConstantModel;

        fn fit(&self, train: LabeledMatrix<'_>, stopping: LabeledMatrix<'_>) -> Result<ConstantModel, TrainingError> {
            let mut calls = self.calls.borrow_mut();
            calls.push((row_ids(train.features), row_ids(stopping.features)));
            Ok(ConstantModel(calls.len() as f64 / 10.0))
        }
    }

    fn dataset(n: usize) -> (FeatureMatrix, Vec<u8>, Vec<i64>, Vec<f64>) {
        let x: Vec<f32> = (0..n).map(|i| (i % 10) as f32).collect();
        let labels = x.iter().map(|&v| u8::from(v >= 7.0)).collect();
        let time: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let groups = time.iter().map(|&t| (t as i64 * 6) / n as i64).collect();
        (
            FeatureMatrix::from_columns(vec!["x".into()], vec![x], n),
            labels,
            groups,
            time,
        )
    }

    #[test]
    fn test_groups_never_span_folds() {
        let groups = [1, 1, 2, 2, 2, 3, 4, 4, 5, 1];
        let folds = group_k_fold(&groups, 3).unwrap();
        for (i, gi) in groups.iter().enumerate() {
            for (j, gj) in groups.iter().enumerate() {
                if gi == gj {
                    assert_eq!(folds[i], folds[j]);
                }
            }
        }
        let mut used: Vec<usize> = folds.clone();
        used.sort_unstable();
        used.dedup();
        assert_eq!(used, vec![0, 1, 2]);
    }

    #[test]
    fn test_greedy_balances_folds() {
        // sizes: 7 -> 4, 8 -> 3, 9 -> 2, 10 -> 1
        let groups = [7, 7, 7, 7, 8, 8, 8, 9, 9, 10];
        let folds = group_k_fold(&groups, 2).unwrap();
        let first = folds.iter().filter(|&&f| f == 0).count();
        assert_eq!(first, 5);
    }

    #[test]
    fn test_not_enough_groups() {
        let err = group_k_fold(&[1, 1, 2], 5).unwrap_err();
        assert!(matches!(err, TrainingError::NotEnoughGroups { groups: 2, folds: 5 }));
        assert!(matches!(group_k_fold(&[1, 2], 1), Err(TrainingError::InvalidFoldCount(1))));
    }

    #[test]
    fn test_oof_covers_every_row() {
        let (x, y, g, t) = dataset(120);
        let trainer = EnsembleTrainer::new(MeanLearner, 3, 0.1);
        let outcome = trainer
            .train(
                TrainingData {
                    features: &x,
                    labels: &y,
                    groups: &g,
                    time: &t,
                },
                None,
            )
            .unwrap();

        assert_eq!(outcome.models.len(), 3);
        assert!(outcome.oof.iter().all(|p| p.is_finite()));
        assert!(outcome.holdout.is_none());
        assert_eq!(outcome.best_iterations(), vec![1, 1, 1]);
    }

    #[test]
    fn test_oof_comes_from_the_model_that_never_saw_the_row() {
        let n = 90;
        let x = FeatureMatrix::from_columns(vec!["row".into()], vec![(0..n).map(|i| i as f32).collect()], n);
        let labels: Vec<u8> = (0..n).map(|i| u8::from(i % 3 == 0)).collect();
        // groups interleave across the time order
        let groups: Vec<i64> = (0..n).map(|i| (i % 7) as i64).collect();
        let time: Vec<f64> = (0..n).map(|i| ((i * 37) % n) as f64).collect();

        let trainer = EnsembleTrainer::new(RecordingLearner::default(), 3, 0.2);
        let outcome = trainer
            .train(
                TrainingData {
                    features: &x,
                    labels: &labels,
                    groups: &groups,
                    time: &time,
                },
                None,
            )
            .unwrap();

        let folds = group_k_fold(&groups, 3).unwrap();
        let calls = trainer.learner.calls.borrow();
        assert_eq!(calls.len(), 3);

        for row in 0..n {
            let fold = folds[row];
            assert_eq!(outcome.models[fold].0, (fold + 1) as f64 / 10.0);
            assert_eq!(outcome.oof[row], outcome.models[fold].0);

            let (fit, stop) = &calls[fold];
            assert!(!fit.contains(&row), "row {row} fit by its own fold model");
            assert!(!stop.contains(&row), "row {row} used to stop its own fold model");

            for (other, (fit, stop)) in calls.iter().enumerate().filter(|&(f, _)| f != fold) {
                let seen = fit.iter().chain(stop).filter(|&&r| r == row).count();
                assert_eq!(seen, 1, "row {row} seen {seen} times by fold {other}");
            }
        }
        assert!(calls.iter().all(|(_, stop)| !stop.is_empty()));
    }

    #[test]
    fn test_holdout_is_average_of_fold_models() {
        let (x, y, g, t) = dataset(120);
        let trainer = EnsembleTrainer::new(MeanLearner, 4, 0.1);
        let outcome = trainer
            .train(
                TrainingData {
                    features: &x,
                    labels: &y,
                    groups: &g,
                    time: &t,
                },
                Some(&x),
            )
            .unwrap();

        let holdout = outcome.holdout.unwrap();
        let expected = outcome.models.iter().map(|m| m.0).sum::<f64>() / 4.0;
        assert!(holdout.iter().all(|&p| (p - expected).abs() < 1e-12));
        assert_eq!(ensemble_predict(&outcome.models, &x), holdout);
    }

    #[test]
    fn test_stopping_slice_is_latest_rows() {
        let trainer = EnsembleTrainer::new(MeanLearner, 2, 0.25);
        let folds = [0, 1, 1, 1, 1, 0];
        let time = [0.0, 4.0, 1.0, 3.0, 2.0, 5.0];
        let (fit, stop) = trainer.split_stopping(&folds, 0, &time);
        assert_eq!(stop, vec![1]);
        assert_eq!(fit, vec![2, 3, 4]);
    }

    #[test]
    fn test_length_mismatch() {
        let (x, y, g, _) = dataset(30);
        let trainer = EnsembleTrainer::new(MeanLearner, 2, 0.1);
        let err = trainer
            .train(
                TrainingData {
                    features: &x,
                    labels: &y,
                    groups: &g,
                    time: &[0.0],
                },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, TrainingError::LengthMismatch { what: "time", .. }));
    }

    #[test]
    fn test_boosted_ensemble_separates_classes() {
        let (x, y, g, t) = dataset(300);
        let learner = BoostedTreesLearner::new(LearnerParams {
            learning_rate: 0.3,
            max_rounds: 30,
            early_stopping_rounds: 5,
            max_depth: 2,
            min_data_in_leaf: 3,
            feature_fraction: 1.0,
            bagging_fraction: 1.0,
            log_every: 0,
            ..LearnerParams::default()
        });
        let outcome = EnsembleTrainer::new(learner, 3, 0.1)
            .train(
                TrainingData {
                    features: &x,
                    labels: &y,
                    groups: &g,
                    time: &t,
                },
                Some(&x),
            )
            .unwrap();

        assert!(outcome.oof_auc.unwrap() > 0.95);
        assert_eq!(outcome.fold_auc.len(), 3);
    }
}
