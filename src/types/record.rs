//! Raw transaction and identity records as they arrive from ingest.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TRANSACTION_ID: &str = "TransactionID";
pub const TRANSACTION_DT: &str = "TransactionDT";
pub const TRANSACTION_AMT: &str = "TransactionAmt";
pub const PRODUCT_CD: &str = "ProductCD";

/// Columns every transaction batch must carry.
pub const REQUIRED_COLUMNS: [&str; 4] = [TRANSACTION_ID, TRANSACTION_DT, TRANSACTION_AMT, PRODUCT_CD];

/// A single cell of an ingested row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Parse a CSV cell. Empty and NaN cells are missing.
    pub fn parse_cell(raw: &str) -> Option<FieldValue> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_nan() => None,
            Ok(n) => Some(FieldValue::Number(n)),
            Err(_) => Some(FieldValue::Text(raw.to_string())),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) if !n.is_nan() => Some(*n),
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| !n.is_nan()),
        }
    }

    /// String form used for joins, categorical codes and output identifiers.
    pub fn to_key_string(&self) -> String {
        match self {
            FieldValue::Number(n) => canonical_number(*n),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

/// Render a number the same way on every code path: integral values
/// without a fractional part, everything else in shortest round-trip form.
pub fn canonical_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// One ingested row: column name to optional cell.
pub type RawRow = BTreeMap<String, Option<FieldValue>>;

/// A transaction with its four required base columns lifted out.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub transaction_id: String,
    /// Seconds since the dataset reference point.
    pub timestamp: f64,
    pub amount: f64,
    pub product_code: String,
    /// Every other column of the row.
    pub fields: BTreeMap<String, Option<FieldValue>>,
}

impl TransactionRecord {
    /// Lift one raw row into a record. `row_index` is only used for error
    /// reporting.
    pub fn from_raw(mut row: RawRow, row_index: usize) -> Result<Self, IngestError> {
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|c| !matches!(row.get(**c), Some(Some(_))))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::MissingColumns(missing));
        }

        let id = take_value(&mut row, TRANSACTION_ID);
        let dt = take_value(&mut row, TRANSACTION_DT);
        let amt = take_value(&mut row, TRANSACTION_AMT);
        let product = take_value(&mut row, PRODUCT_CD);

        let timestamp = numeric(&dt, TRANSACTION_DT, row_index)?;
        let amount = numeric(&amt, TRANSACTION_AMT, row_index)?;

        Ok(Self {
            transaction_id: id.to_key_string(),
            timestamp,
            amount,
            product_code: product.to_key_string(),
            fields: row,
        })
    }

    /// Build a record directly, mainly for tests and synthetic data.
    pub fn new(transaction_id: impl Into<String>, timestamp: f64, amount: f64, product_code: &str) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            timestamp,
            amount,
            product_code: product_code.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: Option<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }
}

/// Optional supplemental attributes for a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub transaction_id: String,
    pub fields: BTreeMap<String, Option<FieldValue>>,
}

impl IdentityRecord {
    pub fn from_raw(mut row: RawRow, _row_index: usize) -> Result<Self, IngestError> {
        match row.remove(TRANSACTION_ID) {
            Some(Some(id)) => Ok(Self {
                transaction_id: id.to_key_string(),
                fields: row,
            }),
            _ => Err(IngestError::MissingColumns(vec![TRANSACTION_ID.to_string()])),
        }
    }

    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: Option<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }
}

/// Check that a batch carries the required columns, reporting every
/// missing column at once.
pub fn validate_batch(rows: &[RawRow]) -> Result<(), IngestError> {
    let mut missing: Vec<String> = Vec::new();
    for row in rows {
        for column in REQUIRED_COLUMNS {
            let present = matches!(row.get(column), Some(Some(_)));
            if !present && !missing.iter().any(|m| m == column) {
                missing.push(column.to_string());
            }
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        missing.sort_by_key(|m| REQUIRED_COLUMNS.iter().position(|c| c == m));
        Err(IngestError::MissingColumns(missing))
    }
}

/// Validate and lift a whole transaction batch. No partial results: the
/// first bad row rejects the batch.
pub fn parse_transactions(rows: Vec<RawRow>) -> Result<Vec<TransactionRecord>, IngestError> {
    validate_batch(&rows)?;
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| TransactionRecord::from_raw(row, i))
        .collect()
}

pub fn parse_identities(rows: Vec<RawRow>) -> Result<Vec<IdentityRecord>, IngestError> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| IdentityRecord::from_raw(row, i))
        .collect()
}

fn take_value(row: &mut RawRow, column: &str) -> FieldValue {
    // presence checked by the caller
    row.remove(column).flatten().unwrap_or(FieldValue::Number(f64::NAN))
}

fn numeric(value: &FieldValue, column: &str, row: usize) -> Result<f64, IngestError> {
    value
        .as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| IngestError::InvalidValue {
            row,
            column: column.to_string(),
            value: value.to_key_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, Option<FieldValue>)]) -> RawRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(FieldValue::parse_cell(""), None);
        assert_eq!(FieldValue::parse_cell("nan"), None);
        assert_eq!(FieldValue::parse_cell("12.5"), Some(FieldValue::Number(12.5)));
        assert_eq!(
            FieldValue::parse_cell("gmail.com"),
            Some(FieldValue::Text("gmail.com".to_string()))
        );
    }

    #[test]
    fn test_canonical_number() {
        assert_eq!(canonical_number(2987000.0), "2987000");
        assert_eq!(canonical_number(100.5), "100.5");
        assert_eq!(canonical_number(-3.0), "-3");
    }

    #[test]
    fn test_transaction_from_raw() {
        let row = raw(&[
            ("TransactionID", Some(FieldValue::Number(2987000.0))),
            ("TransactionDT", Some(FieldValue::Number(86400.0))),
            ("TransactionAmt", Some(FieldValue::Number(68.5))),
            ("ProductCD", Some(FieldValue::Text("W".into()))),
            ("card4", Some(FieldValue::Text("discover".into()))),
        ]);
        let tx = TransactionRecord::from_raw(row, 0).unwrap();
        assert_eq!(tx.transaction_id, "2987000");
        assert_eq!(tx.timestamp, 86400.0);
        assert_eq!(tx.product_code, "W");
        assert_eq!(tx.fields.len(), 1);
        assert!(tx.fields.contains_key("card4"));
    }

    #[test]
    fn test_validate_batch_reports_all_missing() {
        let rows = vec![
            raw(&[
                ("TransactionID", Some(FieldValue::Number(1.0))),
                ("TransactionAmt", Some(FieldValue::Number(10.0))),
            ]),
            raw(&[("TransactionID", Some(FieldValue::Number(2.0)))]),
        ];
        let err = validate_batch(&rows).unwrap_err();
        assert_eq!(
            err,
            IngestError::MissingColumns(vec![
                "TransactionDT".to_string(),
                "TransactionAmt".to_string(),
                "ProductCD".to_string()
            ])
        );
    }

    #[test]
    fn test_non_numeric_amount_rejected() {
        let row = raw(&[
            ("TransactionID", Some(FieldValue::Number(1.0))),
            ("TransactionDT", Some(FieldValue::Number(0.0))),
            ("TransactionAmt", Some(FieldValue::Text("lots".into()))),
            ("ProductCD", Some(FieldValue::Text("W".into()))),
        ]);
        let err = TransactionRecord::from_raw(row, 3).unwrap_err();
        assert!(matches!(err, IngestError::InvalidValue { row: 3, .. }));
    }

    #[test]
    fn test_json_row_deserialization() {
        let json = r#"{"TransactionID": 7, "TransactionDT": 10, "TransactionAmt": 1.5,
                       "ProductCD": "C", "R_emaildomain": null}"#;
        let row: RawRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.get("R_emaildomain"), Some(&None));
        let tx = TransactionRecord::from_raw(row, 0).unwrap();
        assert_eq!(tx.transaction_id, "7");
        assert_eq!(tx.fields.get("R_emaildomain"), Some(&None));
    }

    #[test]
    fn test_identity_requires_id() {
        let row = raw(&[("id_01", Some(FieldValue::Number(-5.0)))]);
        assert!(IdentityRecord::from_raw(row, 0).is_err());
    }
}
