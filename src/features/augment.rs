//! Unsupervised feature augmentation over the combined train and test
//! populations: per-group statistics and frequency encodings.
//!
//! Neither generator looks at the label, so pooling both populations adds
//! no leakage. Both need the two populations at once and therefore only
//! run in the training job; live scoring relies on the artifact's feature
//! list and fills these columns with the neutral default.

use crate::frame::{CellKey, Column, FeatureFrame};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Statistic broadcast back to each row of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatistic {
    Mean,
    Std,
    Median,
    Min,
    Max,
}

impl GroupStatistic {
    pub const ALL: [GroupStatistic; 5] = [
        GroupStatistic::Mean,
        GroupStatistic::Std,
        GroupStatistic::Median,
        GroupStatistic::Min,
        GroupStatistic::Max,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            GroupStatistic::Mean => "mean",
            GroupStatistic::Std => "std",
            GroupStatistic::Median => "median",
            GroupStatistic::Min => "min",
            GroupStatistic::Max => "max",
        }
    }

    /// Column name for a numeric column summarised by a key.
    pub fn column_name(self, numeric: &str, key: &str) -> String {
        format!("{}_{}_{}", numeric, key, self.suffix())
    }
}

/// Summary of one group's non-missing values. NaN where undefined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupSummary {
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl GroupSummary {
    pub fn from_values(mut values: Vec<f64>) -> Self {
        let n = values.len();
        if n == 0 {
            return Self {
                mean: f64::NAN,
                std: f64::NAN,
                median: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
            };
        }

        values.sort_by(|a, b| a.total_cmp(b));
        let mean = values.iter().sum::<f64>() / n as f64;
        let std = if n > 1 {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        } else {
            f64::NAN
        };
        let median = if n % 2 == 0 {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        } else {
            values[n / 2]
        };

        Self {
            mean,
            std,
            median,
            min: values[0],
            max: values[n - 1],
        }
    }

    pub fn get(&self, statistic: GroupStatistic) -> f64 {
        match statistic {
            GroupStatistic::Mean => self.mean,
            GroupStatistic::Std => self.std,
            GroupStatistic::Median => self.median,
            GroupStatistic::Min => self.min,
            GroupStatistic::Max => self.max,
        }
    }
}

/// Configured generator sets.
#[derive(Debug, Clone)]
pub struct UnsupervisedAugmenter {
    pub group_keys: Vec<String>,
    pub numeric_columns: Vec<String>,
}

impl UnsupervisedAugmenter {
    pub fn new(group_keys: Vec<String>, numeric_columns: Vec<String>) -> Self {
        Self {
            group_keys,
            numeric_columns,
        }
    }

    /// Frequency encodings for `frequency_columns`, then group statistics.
    pub fn augment(&self, train: &mut FeatureFrame, test: &mut FeatureFrame, frequency_columns: &[String]) {
        add_frequency_encodings(train, test, frequency_columns);
        add_group_stats(train, test, &self.group_keys, &self.numeric_columns);
    }
}

/// Add `{num}_{key}_{statistic}` columns to both frames.
pub fn add_group_stats(
    train: &mut FeatureFrame,
    test: &mut FeatureFrame,
    keys: &[String],
    numeric_columns: &[String],
) {
    for key in keys {
        for numeric in numeric_columns {
            let present = [&*train, &*test]
                .iter()
                .all(|f| f.has_column(key) && f.has_column(numeric));
            if !present {
                warn!(key = %key, numeric = %numeric, "Group statistic inputs missing, skipping");
                continue;
            }

            let summaries = summarise_groups(&[&*train, &*test], key, numeric);
            debug!(key = %key, numeric = %numeric, groups = summaries.len(), "Group statistics computed");

            for frame in [&mut *train, &mut *test] {
                broadcast_summaries(frame, key, numeric, &summaries);
            }
        }
    }
}

fn summarise_groups(frames: &[&FeatureFrame], key: &str, numeric: &str) -> HashMap<CellKey, GroupSummary> {
    let mut groups: HashMap<CellKey, Vec<f64>> = HashMap::new();
    for frame in frames {
        let (Some(keys), Some(values)) = (frame.column(key), frame.column(numeric)) else {
            continue;
        };
        for row in 0..frame.n_rows() {
            let Some(k) = keys.key_at(row) else { continue };
            let bucket = groups.entry(k).or_default();
            if let Some(v) = values.value_f64(row) {
                bucket.push(v);
            }
        }
    }
    groups
        .into_iter()
        .map(|(k, values)| (k, GroupSummary::from_values(values)))
        .collect()
}

fn broadcast_summaries(
    frame: &mut FeatureFrame,
    key: &str,
    numeric: &str,
    summaries: &HashMap<CellKey, GroupSummary>,
) {
    let Some(keys) = frame.column(key) else { return };
    let row_summaries: Vec<Option<GroupSummary>> = (0..frame.n_rows())
        .map(|row| keys.key_at(row).and_then(|k| summaries.get(&k).copied()))
        .collect();

    for statistic in GroupStatistic::ALL {
        let values = row_summaries
            .iter()
            .map(|s| s.map(|s| s.get(statistic)).unwrap_or(f64::NAN))
            .collect();
        frame.set_column(&statistic.column_name(numeric, key), Column::F64(values));
    }
}

/// Add `{col}_freq` columns: the count of each row's value over both
/// frames, missing counted as a value of its own.
pub fn add_frequency_encodings(train: &mut FeatureFrame, test: &mut FeatureFrame, columns: &[String]) {
    for column in columns {
        let mut counts: HashMap<Option<CellKey>, u64> = HashMap::new();
        for frame in [&*train, &*test] {
            if let Some(values) = frame.column(column) {
                for row in 0..frame.n_rows() {
                    *counts.entry(values.key_at(row)).or_insert(0) += 1;
                }
            }
        }
        if counts.is_empty() {
            warn!(column = %column, "Frequency column missing from both frames, skipping");
            continue;
        }

        for frame in [&mut *train, &mut *test] {
            let freq = match frame.column(column) {
                Some(values) => (0..frame.n_rows())
                    .map(|row| {
                        counts
                            .get(&values.key_at(row))
                            .map(|&c| c as f64)
                            .unwrap_or(f64::NAN)
                    })
                    .collect(),
                None => vec![f64::NAN; frame.n_rows()],
            };
            frame.set_column(&format!("{column}_freq"), Column::F64(freq));
        }
    }
}
