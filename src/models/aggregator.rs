//! Combining per-fold probabilities into one score per row.

/// Equal-weight averaging of the fold models' probabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct FoldAggregator;

impl FoldAggregator {
    /// Mean of `fold_scores[fold][row]` for every row, clamped to `[0, 1]`.
    /// All folds must score the same rows.
    pub fn aggregate(fold_scores: &[Vec<f64>]) -> Vec<f64> {
        let Some(first) = fold_scores.first() else {
            return Vec::new();
        };
        let n_rows = first.len();
        debug_assert!(fold_scores.iter().all(|s| s.len() == n_rows));

        let k = fold_scores.len() as f64;
        (0..n_rows)
            .map(|row| {
                let sum: f64 = fold_scores.iter().map(|scores| scores[row]).sum();
                (sum / k).clamp(0.0, 1.0)
            })
            .collect()
    }

    /// Population standard deviation of the fold scores for each row. Zero
    /// when every fold agrees.
    pub fn spread(fold_scores: &[Vec<f64>]) -> Vec<f64> {
        let Some(first) = fold_scores.first() else {
            return Vec::new();
        };
        let k = fold_scores.len() as f64;
        (0..first.len())
            .map(|row| {
                let mean = fold_scores.iter().map(|s| s[row]).sum::<f64>() / k;
                let var = fold_scores.iter().map(|s| (s[row] - mean).powi(2)).sum::<f64>() / k;
                var.sqrt()
            })
            .collect()
    }
}
