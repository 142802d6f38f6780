//! Columnar working representation of a record batch.
//!
//! `FeatureFrame` holds typed columns in insertion order. `FeatureSchema`
//! is the fixed, ordered list of feature slots a model expects, and
//! `FeatureFrame::to_matrix` is the one place where a frame is reconciled
//! against a schema: present columns are converted, absent ones are filled
//! with the slot's declared default.

use crate::types::record::{canonical_number, FieldValue};
use std::borrow::Cow;
use std::collections::HashMap;

/// Storage type of a column. Float columns use NaN for missing values;
/// integer columns never hold missing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    F64,
    F32,
    I64,
    I32,
    I8,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    F64(Vec<f64>),
    F32(Vec<f32>),
    I64(Vec<i64>),
    I32(Vec<i32>),
    I8(Vec<i8>),
    Text(Vec<Option<String>>),
}

/// Hashable group key for a single cell. Integral floats collapse onto
/// `Int` so the same value keys identically across storage types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellKey {
    Int(i64),
    Float(u64),
    Text(String),
}

impl CellKey {
    fn from_f64(v: f64) -> Option<CellKey> {
        if v.is_nan() {
            None
        } else if v.fract() == 0.0 && v.abs() < 9.0e15 {
            Some(CellKey::Int(v as i64))
        } else {
            Some(CellKey::Float(v.to_bits()))
        }
    }
}

impl Column {
    /// Infer a column from raw cells: any text makes it `Text`, fully
    /// present integral numbers make it `I64`, everything else is `F64`.
    pub fn from_values(values: Vec<Option<FieldValue>>) -> Column {
        let has_text = values
            .iter()
            .any(|v| matches!(v, Some(FieldValue::Text(_))));
        if has_text {
            return Column::Text(
                values
                    .into_iter()
                    .map(|v| v.map(|v| v.to_key_string()))
                    .collect(),
            );
        }

        let numbers: Vec<Option<f64>> = values
            .into_iter()
            .map(|v| v.and_then(|v| v.as_f64()))
            .collect();
        let all_integral = !numbers.is_empty()
            && numbers.iter().all(|n| {
                matches!(n, Some(x) if x.fract() == 0.0 && x.abs() < 9.0e15)
            });
        if all_integral {
            Column::I64(numbers.into_iter().map(|n| n.unwrap_or(0.0) as i64).collect())
        } else {
            Column::F64(numbers.into_iter().map(|n| n.unwrap_or(f64::NAN)).collect())
        }
    }

    pub fn missing_text(len: usize) -> Column {
        Column::Text(vec![None; len])
    }

    pub fn len(&self) -> usize {
        match self {
            Column::F64(v) => v.len(),
            Column::F32(v) => v.len(),
            Column::I64(v) => v.len(),
            Column::I32(v) => v.len(),
            Column::I8(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Column::F64(_) => ColumnType::F64,
            Column::F32(_) => ColumnType::F32,
            Column::I64(_) => ColumnType::I64,
            Column::I32(_) => ColumnType::I32,
            Column::I8(_) => ColumnType::I8,
            Column::Text(_) => ColumnType::Text,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Column::Text(_))
    }

    /// Numeric value of a cell. Text cells are parsed; unparseable text
    /// and missing cells give `None`.
    pub fn value_f64(&self, row: usize) -> Option<f64> {
        let v = match self {
            Column::F64(v) => v[row],
            Column::F32(v) => v[row] as f64,
            Column::I64(v) => return Some(v[row] as f64),
            Column::I32(v) => return Some(v[row] as f64),
            Column::I8(v) => return Some(v[row] as f64),
            Column::Text(v) => return v[row].as_deref().and_then(|s| s.trim().parse::<f64>().ok()),
        };
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }

    /// String form of a cell, `None` when missing.
    pub fn text_at(&self, row: usize) -> Option<Cow<'_, str>> {
        match self {
            Column::Text(v) => v[row].as_deref().map(Cow::Borrowed),
            _ => self.value_f64(row).map(|n| Cow::Owned(canonical_number(n))),
        }
    }

    pub fn key_at(&self, row: usize) -> Option<CellKey> {
        match self {
            Column::Text(v) => v[row].as_ref().map(|s| CellKey::Text(s.clone())),
            Column::I64(v) => Some(CellKey::Int(v[row])),
            Column::I32(v) => Some(CellKey::Int(v[row] as i64)),
            Column::I8(v) => Some(CellKey::Int(v[row] as i64)),
            _ => self.value_f64(row).and_then(CellKey::from_f64),
        }
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Column::Text(v) => v[row].is_none(),
            Column::F64(v) => v[row].is_nan(),
            Column::F32(v) => v[row].is_nan(),
            _ => false,
        }
    }

    /// Model input form: f32 with NaN for missing.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            Column::F32(v) => v.clone(),
            Column::F64(v) => v.iter().map(|&x| x as f32).collect(),
            Column::I64(v) => v.iter().map(|&x| x as f32).collect(),
            Column::I32(v) => v.iter().map(|&x| x as f32).collect(),
            Column::I8(v) => v.iter().map(|&x| x as f32).collect(),
            Column::Text(_) => (0..self.len())
                .map(|i| self.value_f64(i).map(|x| x as f32).unwrap_or(f32::NAN))
                .collect(),
        }
    }
}

/// Typed columns sharing one row index. Row identifiers are kept apart
/// from the columns so they never leak into the feature set.
#[derive(Debug, Clone, Default)]
pub struct FeatureFrame {
    row_ids: Vec<String>,
    names: Vec<String>,
    columns: Vec<Column>,
    index: HashMap<String, usize>,
}

impl FeatureFrame {
    pub fn new(row_ids: Vec<String>) -> Self {
        Self {
            row_ids,
            ..Default::default()
        }
    }

    pub fn n_rows(&self) -> usize {
        self.row_ids.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn row_ids(&self) -> &[String] {
        &self.row_ids
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    /// Insert or replace a column, keeping the position of a replaced one.
    ///
    /// Panics if the column length differs from the frame's row count.
    pub fn set_column(&mut self, name: &str, column: Column) {
        assert_eq!(
            column.len(),
            self.n_rows(),
            "column {} has {} rows, frame has {}",
            name,
            column.len(),
            self.n_rows()
        );
        match self.index.get(name) {
            Some(&i) => self.columns[i] = column,
            None => {
                self.index.insert(name.to_string(), self.columns.len());
                self.names.push(name.to_string());
                self.columns.push(column);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    pub(crate) fn columns_mut(&mut self) -> impl Iterator<Item = &mut Column> {
        self.columns.iter_mut()
    }

    /// Names of columns still holding strings.
    pub fn text_columns(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, c)| c.is_text())
            .map(|(n, _)| n.to_string())
            .collect()
    }

    /// Reconcile against a schema: exactly the schema's slots, in order.
    pub fn to_matrix(&self, schema: &FeatureSchema) -> FeatureMatrix {
        let n_rows = self.n_rows();
        let columns = schema
            .slots()
            .iter()
            .map(|slot| match self.column(&slot.name) {
                Some(column) => column.to_f32_vec(),
                None => vec![slot.default; n_rows],
            })
            .collect();

        FeatureMatrix {
            feature_names: schema.names(),
            columns,
            n_rows,
        }
    }
}

/// One named feature position with the value used when a frame lacks it.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSlot {
    pub name: String,
    pub default: f32,
}

/// Ordered feature slots defining model input layout.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureSchema {
    slots: Vec<FeatureSlot>,
}

impl FeatureSchema {
    pub fn with_default<I, S>(names: I, default: f32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: names
                .into_iter()
                .map(|name| FeatureSlot {
                    name: name.into(),
                    default,
                })
                .collect(),
        }
    }

    /// Every numeric column of a frame except the excluded ones, in frame order.
    pub fn from_frame(frame: &FeatureFrame, exclude: &[String]) -> Self {
        Self::with_default(
            frame
                .iter()
                .filter(|(name, column)| !column.is_text() && !exclude.iter().any(|e| e == name))
                .map(|(name, _)| name.to_string()),
            0.0,
        )
    }

    pub fn slots(&self) -> &[FeatureSlot] {
        &self.slots
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots a frame does not provide.
    pub fn missing_from<'a>(&'a self, frame: &FeatureFrame) -> Vec<&'a str> {
        self.slots
            .iter()
            .filter(|s| !frame.has_column(&s.name))
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Dense f32 model input, stored column-major. NaN marks missing values.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    feature_names: Vec<String>,
    columns: Vec<Vec<f32>>,
    n_rows: usize,
}

impl FeatureMatrix {
    /// Panics if the columns do not all have `n_rows` entries or the name
    /// count differs from the column count.
    pub fn from_columns(feature_names: Vec<String>, columns: Vec<Vec<f32>>, n_rows: usize) -> Self {
        assert_eq!(feature_names.len(), columns.len());
        assert!(columns.iter().all(|c| c.len() == n_rows));
        Self {
            feature_names,
            columns,
            n_rows,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|n| n == name)
    }

    pub fn column(&self, feature: usize) -> &[f32] {
        &self.columns[feature]
    }

    pub fn value(&self, row: usize, feature: usize) -> f32 {
        self.columns[feature][row]
    }

    pub fn row(&self, row: usize) -> Vec<f32> {
        self.columns.iter().map(|c| c[row]).collect()
    }

    /// Copy of the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            feature_names: self.feature_names.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| rows.iter().map(|&r| c[r]).collect())
                .collect(),
            n_rows: rows.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(v: f64) -> Option<FieldValue> {
        Some(FieldValue::Number(v))
    }

    #[test]
    fn test_column_inference() {
        let ints = Column::from_values(vec![num(1.0), num(2.0)]);
        assert_eq!(ints.column_type(), ColumnType::I64);

        let with_missing = Column::from_values(vec![num(1.0), None]);
        assert_eq!(with_missing.column_type(), ColumnType::F64);
        assert!(with_missing.is_missing(1));

        let text = Column::from_values(vec![Some(FieldValue::Text("a".into())), num(3.0)]);
        assert_eq!(text, Column::Text(vec![Some("a".into()), Some("3".into())]));
    }

    #[test]
    fn test_cell_keys_match_across_types() {
        let a = Column::F64(vec![150.0, f64::NAN]);
        let b = Column::I32(vec![150]);
        assert_eq!(a.key_at(0), b.key_at(0));
        assert_eq!(a.key_at(1), None);
    }

    #[test]
    fn test_set_column_replaces_in_place() {
        let mut frame = FeatureFrame::new(vec!["1".into(), "2".into()]);
        frame.set_column("a", Column::I64(vec![1, 2]));
        frame.set_column("b", Column::I64(vec![3, 4]));
        frame.set_column("a", Column::F64(vec![0.5, 0.5]));
        assert_eq!(frame.column_names(), &["a".to_string(), "b".to_string()]);
        assert_eq!(frame.column("a").unwrap().value_f64(0), Some(0.5));
    }

    #[test]
    fn test_to_matrix_fills_absent_slots() {
        let mut frame = FeatureFrame::new(vec!["1".into(), "2".into()]);
        frame.set_column("amount", Column::F64(vec![10.0, f64::NAN]));
        frame.set_column("extra", Column::I64(vec![7, 8]));

        let schema = FeatureSchema::with_default(["amount", "amount_card1_mean"], 0.0);
        assert_eq!(schema.missing_from(&frame), vec!["amount_card1_mean"]);

        let matrix = frame.to_matrix(&schema);
        assert_eq!(matrix.feature_names(), &["amount".to_string(), "amount_card1_mean".to_string()]);
        assert_eq!(matrix.value(0, 0), 10.0);
        assert!(matrix.value(1, 0).is_nan());
        assert_eq!(matrix.column(1), &[0.0, 0.0]);
    }

    #[test]
    fn test_schema_from_frame_skips_text_and_excluded() {
        let mut frame = FeatureFrame::new(vec!["1".into()]);
        frame.set_column("TransactionDT", Column::I64(vec![86400]));
        frame.set_column("card4", Column::Text(vec![Some("visa".into())]));
        frame.set_column("DT_D", Column::I32(vec![1]));
        let schema = FeatureSchema::from_frame(&frame, &["TransactionDT".to_string()]);
        assert_eq!(schema.names(), vec!["DT_D".to_string()]);
    }

    #[test]
    fn test_select_rows() {
        let matrix = FeatureMatrix::from_columns(
            vec!["x".into()],
            vec![vec![1.0, 2.0, 3.0]],
            3,
        );
        let picked = matrix.select_rows(&[2, 0]);
        assert_eq!(picked.column(0), &[3.0, 1.0]);
        assert_eq!(picked.n_rows(), 2);
    }
}
