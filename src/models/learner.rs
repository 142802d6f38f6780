//! Tree learner abstraction and the built-in gradient-boosted trees.
//!
//! The ensemble trainer only relies on `TreeLearner` (fit on a labelled
//! matrix with an early-stopping set) and `Predictor` (probabilities for a
//! matrix, using the model's own best iteration). `BoostedTreesLearner` is
//! a compact histogram learner on logistic loss: depth-limited trees,
//! L1/L2 leaf regularisation, per-round row bagging and per-tree feature
//! sampling. Missing values always follow the left branch.

use crate::error::TrainingError;
use crate::frame::FeatureMatrix;
use crate::models::evaluation::{log_loss, roc_auc};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A fitted model producing fraud probabilities.
pub trait Predictor {
    fn predict(&self, features: &FeatureMatrix) -> Vec<f64>;

    /// Number of boosting iterations used at prediction time.
    fn best_iteration(&self) -> usize;

    /// Structural check run before a stored model is trusted for scoring.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Feature matrix with its binary labels.
#[derive(Debug, Clone, Copy)]
pub struct LabeledMatrix<'a> {
    pub features: &'a FeatureMatrix,
    pub labels: &'a [u8],
}

impl<'a> LabeledMatrix<'a> {
    pub fn new(features: &'a FeatureMatrix, labels: &'a [u8]) -> Self {
        Self { features, labels }
    }
}

/// Black-box learner used for every fold.
pub trait TreeLearner {
    type Model: Predictor;

    /// Fit on `train`, monitoring `stopping` for early stopping. An empty
    /// stopping set disables early stopping.
    fn fit(&self, train: LabeledMatrix<'_>, stopping: LabeledMatrix<'_>) -> Result<Self::Model, TrainingError>;
}

/// Boosting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerParams {
    pub learning_rate: f64,
    /// Upper bound on boosting rounds
    pub max_rounds: usize,
    /// Patience window for early stopping
    pub early_stopping_rounds: usize,
    pub max_depth: usize,
    pub min_data_in_leaf: usize,
    pub min_sum_hessian: f64,
    pub lambda_l1: f64,
    pub lambda_l2: f64,
    /// Share of features sampled per tree
    pub feature_fraction: f64,
    /// Share of rows sampled per round
    pub bagging_fraction: f64,
    pub max_bins: usize,
    pub seed: u64,
    /// Log the monitored metric every this many rounds (0 disables)
    pub log_every: usize,
}

impl Default for LearnerParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.02,
            max_rounds: 20_000,
            early_stopping_rounds: 500,
            max_depth: 8,
            min_data_in_leaf: 200,
            min_sum_hessian: 1e-3,
            lambda_l1: 1.0,
            lambda_l2: 1.0,
            feature_fraction: 0.8,
            bagging_fraction: 0.8,
            max_bins: 255,
            seed: 42,
            log_every: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Regression tree over the model's feature order; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Walk the tree reading feature values through `value`.
    pub fn predict_with<F: Fn(usize) -> f32>(&self, value: F) -> f64 {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let x = value(*feature);
                    i = if x.is_nan() || x <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }

    /// Every split must read a known feature and point forward to an
    /// existing node, so a walk always ends in a leaf.
    fn check(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Split { feature, left, right, .. } = *node {
                if feature >= n_features {
                    return Err(format!("node {i} splits on feature {feature} of {n_features}"));
                }
                for child in [left, right] {
                    if child <= i || child >= self.nodes.len() {
                        return Err(format!("node {i} points to invalid child {child}"));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Fitted boosted ensemble for one fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTrees {
    feature_names: Vec<String>,
    base_score: f64,
    trees: Vec<Tree>,
    best_iteration: usize,
}

impl BoostedTrees {
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Predictor for BoostedTrees {
    fn predict(&self, features: &FeatureMatrix) -> Vec<f64> {
        // features are matched by name; ones the matrix lacks read as missing
        let index: Vec<Option<usize>> = self
            .feature_names
            .iter()
            .map(|name| features.feature_index(name))
            .collect();
        let trees = &self.trees[..self.best_iteration.min(self.trees.len())];

        (0..features.n_rows())
            .map(|row| {
                let lookup = |f: usize| index[f].map(|j| features.value(row, j)).unwrap_or(f32::NAN);
                let margin = self.base_score + trees.iter().map(|t| t.predict_with(lookup)).sum::<f64>();
                sigmoid(margin)
            })
            .collect()
    }

    fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    fn check(&self) -> Result<(), String> {
        for (t, tree) in self.trees.iter().enumerate() {
            tree.check(self.feature_names.len())
                .map_err(|e| format!("tree {t}: {e}"))?;
        }
        Ok(())
    }
}

pub struct BoostedTreesLearner {
    params: LearnerParams,
}

impl BoostedTreesLearner {
    pub fn new(params: LearnerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &LearnerParams {
        &self.params
    }
}

impl TreeLearner for BoostedTreesLearner {
    type Model = BoostedTrees;

    fn fit(&self, train: LabeledMatrix<'_>, stopping: LabeledMatrix<'_>) -> Result<BoostedTrees, TrainingError> {
        let p = &self.params;
        let n = train.features.n_rows();
        if n == 0 {
            return Err(TrainingError::EmptyTrainingSet);
        }
        check_len("training labels", train.labels.len(), n)?;
        check_len("stopping labels", stopping.labels.len(), stopping.features.n_rows())?;
        check_len(
            "stopping features",
            stopping.features.n_features(),
            train.features.n_features(),
        )?;

        let mut rng = StdRng::seed_from_u64(p.seed);
        let binned = BinnedFeatures::new(train.features, p.max_bins.clamp(2, 1024));
        let n_features = train.features.n_features();
        let n_sampled = ((n_features as f64 * p.feature_fraction).ceil() as usize).clamp(1, n_features.max(1));

        let positives = train.labels.iter().filter(|&&y| y == 1).count() as f64;
        let rate = (positives / n as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (rate / (1.0 - rate)).ln();

        let mut margins = vec![base_score; n];
        let mut stop_margins = vec![base_score; stopping.features.n_rows()];
        let monitor = StoppingMetric::for_labels(stopping.labels);

        let mut trees: Vec<Tree> = Vec::new();
        let mut best_score = f64::NEG_INFINITY;
        let mut best_iteration = 0;
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];

        for round in 0..p.max_rounds {
            for i in 0..n {
                let prob = sigmoid(margins[i]);
                grad[i] = prob - train.labels[i] as f64;
                hess[i] = (prob * (1.0 - prob)).max(1e-16);
            }

            let mut rows: Vec<usize> = if p.bagging_fraction < 1.0 {
                (0..n).filter(|_| rng.gen::<f64>() < p.bagging_fraction).collect()
            } else {
                (0..n).collect()
            };
            if rows.is_empty() {
                rows = (0..n).collect();
            }

            let mut features: Vec<usize> = if n_sampled < n_features {
                sample(&mut rng, n_features, n_sampled).into_vec()
            } else {
                (0..n_features).collect()
            };
            features.sort_unstable();

            let ctx = GrowContext {
                binned: &binned,
                grad: &grad,
                hess: &hess,
                features: &features,
                params: p,
            };
            let mut nodes = Vec::new();
            ctx.grow(rows, 0, &mut nodes);
            let tree = Tree { nodes };

            for (i, margin) in margins.iter_mut().enumerate() {
                *margin += tree.predict_with(|f| train.features.value(i, f));
            }
            for (i, margin) in stop_margins.iter_mut().enumerate() {
                *margin += tree.predict_with(|f| stopping.features.value(i, f));
            }
            trees.push(tree);

            let Some(monitor) = monitor else {
                best_iteration = trees.len();
                continue;
            };

            let score = monitor.score(stopping.labels, &stop_margins);
            if p.log_every > 0 && (round + 1) % p.log_every == 0 {
                debug!(round = round + 1, metric = monitor.name(), score = score, "Boosting progress");
            }
            if score > best_score {
                best_score = score;
                best_iteration = trees.len();
            } else if trees.len() - best_iteration >= p.early_stopping_rounds {
                info!(
                    round = round + 1,
                    best_iteration = best_iteration,
                    metric = monitor.name(),
                    best_score = best_score,
                    "Early stopping"
                );
                break;
            }
        }

        trees.truncate(best_iteration);

        Ok(BoostedTrees {
            feature_names: train.features.feature_names().to_vec(),
            base_score,
            trees,
            best_iteration,
        })
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn check_len(what: &'static str, actual: usize, expected: usize) -> Result<(), TrainingError> {
    if actual == expected {
        Ok(())
    } else {
        Err(TrainingError::LengthMismatch {
            what,
            actual,
            expected,
        })
    }
}

/// Metric watched on the early-stopping set. AUC needs both classes; a
/// one-class stopping set falls back to (negated) log loss.
#[derive(Debug, Clone, Copy, PartialEq)]
enum StoppingMetric {
    Auc,
    LogLoss,
}

impl StoppingMetric {
    fn for_labels(labels: &[u8]) -> Option<StoppingMetric> {
        if labels.is_empty() {
            return None;
        }
        let positives = labels.iter().filter(|&&y| y == 1).count();
        if positives == 0 || positives == labels.len() {
            Some(StoppingMetric::LogLoss)
        } else {
            Some(StoppingMetric::Auc)
        }
    }

    /// Higher is better.
    fn score(self, labels: &[u8], margins: &[f64]) -> f64 {
        let probs: Vec<f64> = margins.iter().map(|&m| sigmoid(m)).collect();
        match self {
            StoppingMetric::Auc => roc_auc(labels, &probs).unwrap_or(0.5),
            StoppingMetric::LogLoss => -log_loss(labels, &probs),
        }
    }

    fn name(self) -> &'static str {
        match self {
            StoppingMetric::Auc => "auc",
            StoppingMetric::LogLoss => "binary_logloss",
        }
    }
}

const MISSING_BIN: u16 = u16::MAX;

/// Per-feature cut points and the bin of every training row.
/// Bin `b` holds values in `(thresholds[b-1], thresholds[b]]`.
struct BinnedFeatures {
    thresholds: Vec<Vec<f32>>,
    bins: Vec<Vec<u16>>,
}

impl BinnedFeatures {
    fn new(features: &FeatureMatrix, max_bins: usize) -> Self {
        let mut thresholds = Vec::with_capacity(features.n_features());
        let mut bins = Vec::with_capacity(features.n_features());

        for f in 0..features.n_features() {
            let column = features.column(f);
            let mut values: Vec<f32> = column.iter().copied().filter(|v| v.is_finite()).collect();
            values.sort_by(|a, b| a.total_cmp(b));
            values.dedup();

            let cuts = if values.len() <= max_bins {
                values
            } else {
                let mut cuts: Vec<f32> = (1..max_bins).map(|k| values[k * values.len() / max_bins]).collect();
                cuts.dedup();
                cuts
            };

            let column_bins = column
                .iter()
                .map(|&v| {
                    if v.is_nan() {
                        MISSING_BIN
                    } else {
                        cuts.partition_point(|&t| t < v) as u16
                    }
                })
                .collect();

            thresholds.push(cuts);
            bins.push(column_bins);
        }

        Self { thresholds, bins }
    }
}

struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

struct GrowContext<'a> {
    binned: &'a BinnedFeatures,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    params: &'a LearnerParams,
}

impl GrowContext<'_> {
    /// Grow a subtree over `rows`, returning its root index in `nodes`.
    fn grow(&self, rows: Vec<usize>, depth: usize, nodes: &mut Vec<Node>) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();

        let index = nodes.len();
        nodes.push(Node::Leaf {
            value: self.leaf_value(g, h),
        });

        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_data_in_leaf.max(1) {
            return index;
        }
        let Some(split) = self.best_split(&rows, g, h) else {
            return index;
        };

        let feature_bins = &self.binned.bins[split.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.into_iter().partition(|&r| {
            let b = feature_bins[r];
            b == MISSING_BIN || (b as usize) <= split.bin
        });

        let left = self.grow(left_rows, depth + 1, nodes);
        let right = self.grow(right_rows, depth + 1, nodes);
        nodes[index] = Node::Split {
            feature: split.feature,
            threshold: self.binned.thresholds[split.feature][split.bin],
            left,
            right,
        };
        index
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let p = self.params;
        let min_data = p.min_data_in_leaf.max(1);
        let parent = self.score(g, h);
        let mut best: Option<SplitCandidate> = None;

        for &f in self.features {
            let cuts = &self.binned.thresholds[f];
            if cuts.is_empty() {
                continue;
            }
            let bins = &self.binned.bins[f];
            let n_bins = cuts.len() + 1;
            let mut hist_g = vec![0.0; n_bins];
            let mut hist_h = vec![0.0; n_bins];
            let mut hist_n = vec![0usize; n_bins];
            let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);

            for &r in rows {
                let b = bins[r];
                if b == MISSING_BIN {
                    gl += self.grad[r];
                    hl += self.hess[r];
                    nl += 1;
                } else {
                    let b = b as usize;
                    hist_g[b] += self.grad[r];
                    hist_h[b] += self.hess[r];
                    hist_n[b] += 1;
                }
            }

            for s in 0..cuts.len() {
                gl += hist_g[s];
                hl += hist_h[s];
                nl += hist_n[s];
                let (gr, hr, nr) = (g - gl, h - hl, rows.len() - nl);
                if nl < min_data || nr < min_data || hl < p.min_sum_hessian || hr < p.min_sum_hessian {
                    continue;
                }
                let gain = self.score(gl, hl) + self.score(gr, hr) - parent;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature: f,
                        bin: s,
                        gain,
                    });
                }
            }
        }

        best
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let g = soft_threshold(g, self.params.lambda_l1);
        g * g / (h + self.params.lambda_l2)
    }

    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        -soft_threshold(g, self.params.lambda_l1) / (h + self.params.lambda_l2) * self.params.learning_rate
    }
}

fn soft_threshold(g: f64, l1: f64) -> f64 {
    g.signum() * (g.abs() - l1).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> LearnerParams {
        LearnerParams {
            learning_rate: 0.3,
            max_rounds: 50,
            early_stopping_rounds: 5,
            max_depth: 3,
            min_data_in_leaf: 2,
            lambda_l1: 0.0,
            feature_fraction: 1.0,
            bagging_fraction: 1.0,
            log_every: 0,
            ..LearnerParams::default()
        }
    }

    /// Label is 1 exactly when x > 5; y is noise.
    fn separable(n: usize) -> (FeatureMatrix, Vec<u8>) {
        let x: Vec<f32> = (0..n).map(|i| (i % 10) as f32).collect();
        let noise: Vec<f32> = (0..n).map(|i| ((i * 7) % 3) as f32).collect();
        let labels = x.iter().map(|&v| u8::from(v > 5.0)).collect();
        (
            FeatureMatrix::from_columns(vec!["x".into(), "noise".into()], vec![x, noise], n),
            labels,
        )
    }

    #[test]
    fn test_learns_separable_threshold() {
        let (x, y) = separable(200);
        let (sx, sy) = separable(50);
        let model = BoostedTreesLearner::new(params())
            .fit(LabeledMatrix::new(&x, &y), LabeledMatrix::new(&sx, &sy))
            .unwrap();

        let probs = model.predict(&sx);
        assert_eq!(roc_auc(&sy, &probs), Some(1.0));
        assert!(model.best_iteration() >= 1);
        assert_eq!(model.n_trees(), model.best_iteration());
    }

    #[test]
    fn test_early_stopping_truncates() {
        let (x, y) = separable(200);
        let (sx, sy) = separable(50);
        let model = BoostedTreesLearner::new(LearnerParams {
            max_rounds: 500,
            ..params()
        })
        .fit(LabeledMatrix::new(&x, &y), LabeledMatrix::new(&sx, &sy))
        .unwrap();
        // AUC saturates at 1.0 on the first tree
        assert!(model.best_iteration() < 500);
    }

    #[test]
    fn test_without_stopping_set_uses_all_rounds() {
        let (x, y) = separable(100);
        let empty = x.select_rows(&[]);
        let model = BoostedTreesLearner::new(LearnerParams {
            max_rounds: 7,
            ..params()
        })
        .fit(LabeledMatrix::new(&x, &y), LabeledMatrix::new(&empty, &[]))
        .unwrap();
        assert_eq!(model.best_iteration(), 7);
    }

    #[test]
    fn test_missing_values_follow_left_branch() {
        let tree = Tree {
            nodes: vec![
                Node::Split {
                    feature: 0,
                    threshold: 1.0,
                    left: 1,
                    right: 2,
                },
                Node::Leaf { value: -1.0 },
                Node::Leaf { value: 1.0 },
            ],
        };
        assert_eq!(tree.predict_with(|_| f32::NAN), -1.0);
        assert_eq!(tree.predict_with(|_| 1.0), -1.0);
        assert_eq!(tree.predict_with(|_| 1.5), 1.0);
        assert_eq!(tree.n_leaves(), 2);
    }

    #[test]
    fn test_check_rejects_broken_trees() {
        let split = |feature, left, right| Node::Split {
            feature,
            threshold: 0.5,
            left,
            right,
        };
        let leaf = || Node::Leaf { value: 0.0 };
        let model = |nodes: Vec<Node>| BoostedTrees {
            feature_names: vec!["x".into(), "y".into()],
            base_score: 0.0,
            trees: vec![Tree { nodes }],
            best_iteration: 1,
        };

        assert!(model(vec![split(1, 1, 2), leaf(), leaf()]).check().is_ok());
        assert!(model(vec![split(2, 1, 2), leaf(), leaf()]).check().is_err());
        assert!(model(vec![split(0, 1, 3), leaf(), leaf()]).check().is_err());
        // a child pointing back at its parent would never reach a leaf
        assert!(model(vec![split(0, 1, 2), leaf(), split(0, 1, 2)]).check().is_err());
        assert!(model(Vec::new()).check().is_err());
    }

    #[test]
    fn test_predict_matches_features_by_name() {
        let (x, y) = separable(200);
        let model = BoostedTreesLearner::new(params())
            .fit(LabeledMatrix::new(&x, &y), LabeledMatrix::new(&x, &y))
            .unwrap();

        let reordered = FeatureMatrix::from_columns(
            vec!["noise".into(), "x".into()],
            vec![vec![0.0, 0.0], vec![9.0, 0.0]],
            2,
        );
        let probs = model.predict(&reordered);
        assert!(probs[0] > probs[1]);
    }

    #[test]
    fn test_probabilities_in_unit_interval() {
        let (x, y) = separable(120);
        let model = BoostedTreesLearner::new(params())
            .fit(LabeledMatrix::new(&x, &y), LabeledMatrix::new(&x, &y))
            .unwrap();
        let with_missing = FeatureMatrix::from_columns(
            vec!["x".into(), "noise".into()],
            vec![vec![f32::NAN, 3.0], vec![f32::NAN, f32::NAN]],
            2,
        );
        for p in model.predict(&with_missing) {
            assert!(p.is_finite() && (0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_model_serialization() {
        let (x, y) = separable(60);
        let model = BoostedTreesLearner::new(LearnerParams {
            max_rounds: 3,
            ..params()
        })
        .fit(LabeledMatrix::new(&x, &y), LabeledMatrix::new(&x, &y))
        .unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let back: BoostedTrees = serde_json::from_str(&json).unwrap();
        assert_eq!(back.predict(&x), model.predict(&x));
    }
}
