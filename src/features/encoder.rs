//! Categorical encoder.
//!
//! Codes are fit once over the union of two populations and stored in the
//! model artifact. At serving time a column holding a value outside that
//! code space is replaced wholesale by the default code instead of failing
//! the request.

use crate::frame::{Column, FeatureFrame};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;

/// Token standing in for a missing value before encoding.
pub const MISSING_TOKEN: &str = "NA";

/// Code substituted for a whole column containing an unseen label.
pub const DEFAULT_CODE: i64 = 0;

/// Outcome of encoding one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Code(u32),
    Unseen(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unseen label {value:?}")]
pub struct UnseenLabel {
    pub value: String,
}

/// A column that fell back to the default code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnseenColumn {
    pub column: String,
    pub value: String,
}

/// Sorted code space: the code of a label is its position in `classes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoder {
    classes: Vec<String>,
}

impl Encoder {
    /// Fit over the union of two columns of the same logical feature.
    pub fn fit(left: &Column, right: &Column) -> Self {
        let mut labels = BTreeSet::new();
        for column in [left, right] {
            for row in 0..column.len() {
                labels.insert(label_of(column, row));
            }
        }
        Self {
            classes: labels.into_iter().collect(),
        }
    }

    /// Fit over arbitrary labels, `None` standing for missing.
    pub fn fit_labels<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let labels: BTreeSet<String> = values
            .into_iter()
            .map(|v| match v {
                Some(s) => s.as_ref().to_string(),
                None => MISSING_TOKEN.to_string(),
            })
            .collect();
        Self {
            classes: labels.into_iter().collect(),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn encode(&self, value: Option<&str>) -> Encoded {
        let label = value.unwrap_or(MISSING_TOKEN);
        match self.classes.binary_search_by(|c| c.as_str().cmp(label)) {
            Ok(code) => Encoded::Code(code as u32),
            Err(_) => Encoded::Unseen(label.to_string()),
        }
    }

    pub fn decode(&self, code: u32) -> Option<&str> {
        self.classes.get(code as usize).map(String::as_str)
    }

    /// Encode a whole column, stopping at the first unseen label.
    pub fn apply(&self, column: &Column) -> Result<Vec<i64>, UnseenLabel> {
        (0..column.len())
            .map(|row| match self.encode(column.text_at(row).as_deref()) {
                Encoded::Code(code) => Ok(code as i64),
                Encoded::Unseen(value) => Err(UnseenLabel { value }),
            })
            .collect()
    }
}

fn label_of(column: &Column, row: usize) -> String {
    column
        .text_at(row)
        .map(|s| s.into_owned())
        .unwrap_or_else(|| MISSING_TOKEN.to_string())
}

/// Replace every encoded column of `frame` by its codes.
///
/// Columns the encoders know but the frame lacks are synthesised as all
/// missing first. A column with an unseen label is set to `DEFAULT_CODE`
/// throughout and reported in the returned list.
pub fn apply_encoders(
    encoders: &BTreeMap<String, Encoder>,
    frame: &mut FeatureFrame,
) -> Vec<UnseenColumn> {
    let mut unseen = Vec::new();
    let n_rows = frame.n_rows();

    for (name, encoder) in encoders {
        if !frame.has_column(name) {
            frame.set_column(name, Column::missing_text(n_rows));
        }
        let codes = match frame.column(name) {
            Some(column) => encoder.apply(column),
            None => continue,
        };
        match codes {
            Ok(codes) => frame.set_column(name, Column::I64(codes)),
            Err(UnseenLabel { value }) => {
                warn!(
                    column = %name,
                    value = %value,
                    "Unseen label in column, using default encoding"
                );
                frame.set_column(name, Column::I64(vec![DEFAULT_CODE; n_rows]));
                unseen.push(UnseenColumn {
                    column: name.clone(),
                    value,
                });
            }
        }
    }

    unseen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(values: &[Option<&str>]) -> Column {
        Column::Text(values.iter().map(|v| v.map(str::to_string)).collect())
    }

    #[test]
    fn test_fit_on_union_sorted() {
        let encoder = Encoder::fit(
            &text(&[Some("visa"), None]),
            &text(&[Some("discover"), Some("visa")]),
        );
        assert_eq!(encoder.classes(), &["NA", "discover", "visa"]);
        assert_eq!(encoder.encode(Some("visa")), Encoded::Code(2));
        assert_eq!(encoder.encode(None), Encoded::Code(0));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let encoder = Encoder::fit(&text(&[Some("W"), Some("C")]), &text(&[Some("H")]));
        let first = encoder.encode(Some("H"));
        for _ in 0..3 {
            assert_eq!(encoder.encode(Some("H")), first);
        }
        assert_eq!(encoder.decode(1), Some("H"));
    }

    #[test]
    fn test_unseen_value_reported() {
        let encoder = Encoder::fit_labels([Some("W"), Some("C")]);
        assert_eq!(encoder.encode(Some("S")), Encoded::Unseen("S".to_string()));
        let err = encoder.apply(&text(&[Some("W"), Some("S")])).unwrap_err();
        assert_eq!(err.value, "S");
    }

    #[test]
    fn test_numeric_values_encode_by_canonical_string() {
        let encoder = Encoder::fit(&Column::F64(vec![100.0, f64::NAN]), &Column::I64(vec![7]));
        assert_eq!(encoder.classes(), &["100", "7", "NA"]);
        assert_eq!(encoder.apply(&Column::I32(vec![100, 7])).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_apply_encoders_defaults_unseen_column() {
        let mut encoders = BTreeMap::new();
        encoders.insert("card4".to_string(), Encoder::fit_labels([Some("visa"), Some("discover")]));
        encoders.insert("ProductCD".to_string(), Encoder::fit_labels([Some("W"), Some("C")]));

        let mut frame = FeatureFrame::new(vec!["1".into(), "2".into()]);
        frame.set_column("card4", text(&[Some("visa"), Some("unionpay")]));
        frame.set_column("ProductCD", text(&[Some("C"), Some("W")]));

        let unseen = apply_encoders(&encoders, &mut frame);
        assert_eq!(
            unseen,
            vec![UnseenColumn {
                column: "card4".into(),
                value: "unionpay".into()
            }]
        );
        assert_eq!(frame.column("card4").unwrap(), &Column::I64(vec![0, 0]));
        assert_eq!(frame.column("ProductCD").unwrap(), &Column::I64(vec![0, 1]));
    }

    #[test]
    fn test_apply_encoders_synthesises_absent_column() {
        let mut encoders = BTreeMap::new();
        encoders.insert("M4".to_string(), Encoder::fit_labels([Some("M0"), None]));

        let mut frame = FeatureFrame::new(vec!["1".into()]);
        let unseen = apply_encoders(&encoders, &mut frame);
        assert!(unseen.is_empty());
        // "NA" sorts after "M0"
        assert_eq!(frame.column("M4").unwrap(), &Column::I64(vec![1]));
    }

    #[test]
    fn test_absent_column_without_missing_class_falls_back() {
        let mut encoders = BTreeMap::new();
        encoders.insert("M4".to_string(), Encoder::fit_labels([Some("M0")]));

        let mut frame = FeatureFrame::new(vec!["1".into()]);
        let unseen = apply_encoders(&encoders, &mut frame);
        assert_eq!(unseen.len(), 1);
        assert_eq!(frame.column("M4").unwrap(), &Column::I64(vec![DEFAULT_CODE]));
    }
}
