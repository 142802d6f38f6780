//! Base feature builder.
//!
//! Joins identity records onto transactions and derives the time, amount,
//! email-domain, device and flag features. The same code runs for the
//! training job and for live scoring.

use crate::error::MergeError;
use crate::frame::{Column, FeatureFrame};
use crate::types::record::{
    FieldValue, IdentityRecord, TransactionRecord, PRODUCT_CD, TRANSACTION_AMT, TRANSACTION_DT,
};
use regex::Regex;
use std::collections::{HashMap, HashSet};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Identity column whose presence marks a transaction as having identity data.
pub const ID_PROBE_COLUMN: &str = "id_01";
pub const EMAIL_COLUMNS: [&str; 2] = ["P_emaildomain", "R_emaildomain"];
pub const DEVICE_INFO: &str = "DeviceInfo";
pub const DEVICE_NAME: &str = "DeviceName";
pub const DEVICE_VERSION: &str = "DeviceVersion";

pub const DAY_INDEX: &str = "DT_D";
pub const WEEK_INDEX: &str = "DT_W";
pub const MONTH_BLOCK: &str = "DT_M";
pub const LOG_AMOUNT: &str = "TransactionAmt_log1p";
pub const AMOUNT_CENTS: &str = "amt_cents";
pub const HAS_IDENTITY: &str = "has_id";
pub const EMAIL_MATCH: &str = "is_email_match";

pub struct BaseFeatureBuilder {
    device_version: Regex,
}

impl BaseFeatureBuilder {
    pub fn new() -> Self {
        Self {
            device_version: Regex::new(r"/(\S+)$").expect("device version pattern is valid"),
        }
    }

    /// Full feature frame: left join of identities onto transactions plus
    /// every derived column.
    pub fn build(
        &self,
        transactions: &[TransactionRecord],
        identities: &[IdentityRecord],
    ) -> Result<FeatureFrame, MergeError> {
        let mut frame = transaction_frame(transactions);
        join_identity(&mut frame, identities)?;

        add_time_features(&mut frame, transactions);
        add_amount_features(&mut frame, transactions);
        for column in EMAIL_COLUMNS {
            add_email_split(&mut frame, column);
        }
        self.add_device_features(&mut frame);
        add_flags(&mut frame);

        Ok(frame)
    }

    /// Reduced frame used when the identity merge is unavailable: raw
    /// transaction columns, time buckets, amount transforms and zeroed
    /// identity/email flags.
    pub fn build_minimal(&self, transactions: &[TransactionRecord]) -> FeatureFrame {
        let mut frame = transaction_frame(transactions);
        add_time_features(&mut frame, transactions);
        add_amount_features(&mut frame, transactions);

        let n_rows = frame.n_rows();
        frame.set_column(HAS_IDENTITY, Column::I8(vec![0; n_rows]));
        frame.set_column(EMAIL_MATCH, Column::I8(vec![0; n_rows]));
        frame
    }

    fn add_device_features(&self, frame: &mut FeatureFrame) {
        let n_rows = frame.n_rows();
        let info: Vec<String> = match frame.column(DEVICE_INFO) {
            Some(column) => (0..n_rows)
                .map(|row| {
                    column
                        .text_at(row)
                        .map(|s| s.into_owned())
                        .unwrap_or_else(|| "NA".to_string())
                })
                .collect(),
            None => vec!["NA".to_string(); n_rows],
        };

        let names = info
            .iter()
            .map(|s| Some(s.split('/').next().unwrap_or_default().to_string()))
            .collect();
        let versions = info
            .iter()
            .map(|s| {
                self.device_version
                    .captures(s)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
            })
            .collect();

        frame.set_column(DEVICE_NAME, Column::Text(names));
        frame.set_column(DEVICE_VERSION, Column::Text(versions));
    }
}

impl Default for BaseFeatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Day, week and month-like block of a timestamp.
pub fn time_buckets(timestamp: f64) -> (i32, i32, i32) {
    let day = (timestamp / SECONDS_PER_DAY).floor() as i32;
    (day, day.div_euclid(7), day.div_euclid(30))
}

/// `ln(1 + amount)` and the sub-unit part of the amount rounded to cents,
/// halves going to the even cent.
pub fn amount_transforms(amount: f64) -> (f64, f64) {
    let cents = ((amount - amount.floor()) * 100.0).round_ties_even() / 100.0;
    (amount.ln_1p(), cents)
}

/// Provider (before the first '.') and top-level domain (after the last '.').
pub fn split_email_domain(domain: &str) -> (String, String) {
    let provider = domain.split('.').next().unwrap_or_default();
    let tld = domain.rsplit('.').next().unwrap_or_default();
    (provider.to_string(), tld.to_string())
}

/// Rename `id-NN` identity columns to the `id_NN` convention.
pub fn normalize_identity_column(name: &str) -> String {
    if name.starts_with("id-") {
        name.replace('-', "_")
    } else {
        name.to_string()
    }
}

fn transaction_frame(transactions: &[TransactionRecord]) -> FeatureFrame {
    let ids = transactions.iter().map(|t| t.transaction_id.clone()).collect();
    let mut frame = FeatureFrame::new(ids);

    frame.set_column(
        TRANSACTION_DT,
        Column::from_values(
            transactions
                .iter()
                .map(|t| Some(FieldValue::Number(t.timestamp)))
                .collect(),
        ),
    );
    frame.set_column(
        TRANSACTION_AMT,
        Column::F64(transactions.iter().map(|t| t.amount).collect()),
    );
    frame.set_column(
        PRODUCT_CD,
        Column::Text(transactions.iter().map(|t| Some(t.product_code.clone())).collect()),
    );

    for name in union_of_fields(transactions.iter().map(|t| t.fields.keys())) {
        let values = transactions
            .iter()
            .map(|t| t.fields.get(&name).cloned().flatten())
            .collect();
        frame.set_column(&name, Column::from_values(values));
    }

    frame
}

fn join_identity(frame: &mut FeatureFrame, identities: &[IdentityRecord]) -> Result<(), MergeError> {
    let mut by_id: HashMap<&str, usize> = HashMap::with_capacity(identities.len());
    for (i, identity) in identities.iter().enumerate() {
        if by_id.insert(identity.transaction_id.as_str(), i).is_some() {
            return Err(MergeError::DuplicateIdentity(identity.transaction_id.clone()));
        }
    }

    // renamed column -> original keys that map onto it
    let mut renamed: Vec<(String, Vec<String>)> = Vec::new();
    for original in union_of_fields(identities.iter().map(|i| i.fields.keys())) {
        let name = normalize_identity_column(&original);
        match renamed.iter_mut().find(|(n, _)| *n == name) {
            Some((_, sources)) => sources.push(original),
            None => renamed.push((name, vec![original])),
        }
    }

    for (name, _) in &renamed {
        if frame.has_column(name) {
            return Err(MergeError::ColumnConflict(name.clone()));
        }
    }

    let matches: Vec<Option<&IdentityRecord>> = frame
        .row_ids()
        .iter()
        .map(|id| by_id.get(id.as_str()).map(|&i| &identities[i]))
        .collect();

    for (name, sources) in renamed {
        let values = matches
            .iter()
            .map(|identity| {
                identity.and_then(|identity| {
                    sources
                        .iter()
                        .find_map(|s| identity.fields.get(s).cloned().flatten())
                })
            })
            .collect();
        frame.set_column(&name, Column::from_values(values));
    }

    Ok(())
}

fn add_time_features(frame: &mut FeatureFrame, transactions: &[TransactionRecord]) {
    let buckets: Vec<(i32, i32, i32)> = transactions.iter().map(|t| time_buckets(t.timestamp)).collect();
    frame.set_column(DAY_INDEX, Column::I32(buckets.iter().map(|b| b.0).collect()));
    frame.set_column(WEEK_INDEX, Column::I32(buckets.iter().map(|b| b.1).collect()));
    frame.set_column(MONTH_BLOCK, Column::I32(buckets.iter().map(|b| b.2).collect()));
}

fn add_amount_features(frame: &mut FeatureFrame, transactions: &[TransactionRecord]) {
    let transforms: Vec<(f64, f64)> = transactions.iter().map(|t| amount_transforms(t.amount)).collect();
    frame.set_column(LOG_AMOUNT, Column::F64(transforms.iter().map(|t| t.0).collect()));
    frame.set_column(AMOUNT_CENTS, Column::F64(transforms.iter().map(|t| t.1).collect()));
}

fn add_email_split(frame: &mut FeatureFrame, column: &str) {
    let n_rows = frame.n_rows();
    let splits: Vec<Option<(String, String)>> = match frame.column(column) {
        Some(domains) => (0..n_rows)
            .map(|row| domains.text_at(row).map(|d| split_email_domain(&d)))
            .collect(),
        None => vec![None; n_rows],
    };

    frame.set_column(
        &format!("{column}_prov"),
        Column::Text(splits.iter().map(|s| s.as_ref().map(|s| s.0.clone())).collect()),
    );
    frame.set_column(
        &format!("{column}_tld"),
        Column::Text(splits.into_iter().map(|s| s.map(|s| s.1)).collect()),
    );
}

fn add_flags(frame: &mut FeatureFrame) {
    let n_rows = frame.n_rows();

    let has_id = match frame.column(ID_PROBE_COLUMN) {
        Some(probe) => (0..n_rows).map(|row| i8::from(!probe.is_missing(row))).collect(),
        None => vec![0; n_rows],
    };

    let email_match = match (frame.column(EMAIL_COLUMNS[0]), frame.column(EMAIL_COLUMNS[1])) {
        (Some(p), Some(r)) => (0..n_rows)
            .map(|row| match (p.text_at(row), r.text_at(row)) {
                (Some(a), Some(b)) => i8::from(a == b),
                _ => 0,
            })
            .collect(),
        _ => vec![0; n_rows],
    };

    frame.set_column(HAS_IDENTITY, Column::I8(has_id));
    frame.set_column(EMAIL_MATCH, Column::I8(email_match));
}

/// Union of field names in first-seen order.
fn union_of_fields<'a, I, K>(rows: I) -> Vec<String>
where
    I: Iterator<Item = K>,
    K: Iterator<Item = &'a String>,
{
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for keys in rows {
        for key in keys {
            if seen.insert(key.as_str()) {
                names.push(key.clone());
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Option<FieldValue> {
        Some(FieldValue::Text(s.to_string()))
    }

    fn num(v: f64) -> Option<FieldValue> {
        Some(FieldValue::Number(v))
    }

    #[test]
    fn test_time_buckets() {
        assert_eq!(time_buckets(0.0), (0, 0, 0));
        assert_eq!(time_buckets(86_399.0), (0, 0, 0));
        assert_eq!(time_buckets(86_400.0 * 37.0 + 5.0), (37, 5, 1));
    }

    #[test]
    fn test_time_buckets_monotone() {
        let mut previous = (0, 0, 0);
        for t in (0..200).map(|i| i as f64 * 43_217.0) {
            let (day, week, month) = time_buckets(t);
            assert_eq!(week, day / 7);
            assert_eq!(month, day / 30);
            assert!(day >= previous.0 && week >= previous.1 && month >= previous.2);
            previous = (day, week, month);
        }
    }

    #[test]
    fn test_amount_transforms() {
        let (log, cents) = amount_transforms(100.256);
        assert!((cents - 0.26).abs() < 1e-12);
        assert!((log - 101.256_f64.ln()).abs() < 1e-12);

        // exact half-cent ties go to the even cent
        assert_eq!(amount_transforms(1.125).1, 0.12);
        assert_eq!(amount_transforms(7.375).1, 0.38);
    }

    #[test]
    fn test_split_email_domain() {
        assert_eq!(split_email_domain("gmail.com"), ("gmail".into(), "com".into()));
        assert_eq!(split_email_domain("yahoo.co.uk"), ("yahoo".into(), "uk".into()));
        assert_eq!(split_email_domain("anonymous"), ("anonymous".into(), "anonymous".into()));
    }

    #[test]
    fn test_email_features() {
        let builder = BaseFeatureBuilder::new();
        let transactions = vec![
            TransactionRecord::new("1", 0.0, 10.0, "W")
                .with_field("P_emaildomain", text("gmail.com"))
                .with_field("R_emaildomain", text("gmail.com")),
            TransactionRecord::new("2", 0.0, 10.0, "W")
                .with_field("P_emaildomain", text("gmail.com"))
                .with_field("R_emaildomain", None),
        ];
        let frame = builder.build(&transactions, &[]).unwrap();

        assert_eq!(frame.column(EMAIL_MATCH).unwrap(), &Column::I8(vec![1, 0]));
        let prov = frame.column("P_emaildomain_prov").unwrap();
        assert_eq!(prov.text_at(1).as_deref(), Some("gmail"));
        let tld = frame.column("P_emaildomain_tld").unwrap();
        assert_eq!(tld.text_at(1).as_deref(), Some("com"));
        assert!(frame.column("R_emaildomain_prov").unwrap().is_missing(1));
    }

    #[test]
    fn test_device_split() {
        let builder = BaseFeatureBuilder::new();
        let transactions = vec![
            TransactionRecord::new("1", 0.0, 1.0, "W"),
            TransactionRecord::new("2", 0.0, 1.0, "W"),
            TransactionRecord::new("3", 0.0, 1.0, "W"),
        ];
        let identities = vec![
            IdentityRecord::new("1").with_field("DeviceInfo", text("SM-G9650 Build/R16NW")),
            IdentityRecord::new("2").with_field("DeviceInfo", text("Windows")),
        ];
        let frame = builder.build(&transactions, &identities).unwrap();

        let names = frame.column(DEVICE_NAME).unwrap();
        assert_eq!(names.text_at(0).as_deref(), Some("SM-G9650 Build"));
        assert_eq!(names.text_at(1).as_deref(), Some("Windows"));
        assert_eq!(names.text_at(2).as_deref(), Some("NA"));

        let versions = frame.column(DEVICE_VERSION).unwrap();
        assert_eq!(versions.text_at(0).as_deref(), Some("R16NW"));
        assert!(versions.is_missing(1));
        assert!(versions.is_missing(2));
    }

    #[test]
    fn test_left_join_and_identity_flag() {
        let builder = BaseFeatureBuilder::new();
        let transactions = vec![
            TransactionRecord::new("10", 0.0, 1.0, "W"),
            TransactionRecord::new("11", 0.0, 1.0, "W"),
        ];
        let identities = vec![IdentityRecord::new("11")
            .with_field("id-01", num(-5.0))
            .with_field("id-12", text("NotFound"))];

        let frame = builder.build(&transactions, &identities).unwrap();
        assert_eq!(frame.n_rows(), 2);
        assert!(frame.has_column("id_01"));
        assert!(frame.has_column("id_12"));
        assert!(!frame.has_column("id-01"));
        assert_eq!(frame.column(HAS_IDENTITY).unwrap(), &Column::I8(vec![0, 1]));
    }

    #[test]
    fn test_no_identity_columns_gives_zero_flag() {
        let builder = BaseFeatureBuilder::new();
        let transactions = vec![TransactionRecord::new("1", 0.0, 1.0, "W")];
        let frame = builder.build(&transactions, &[]).unwrap();
        assert_eq!(frame.column(HAS_IDENTITY).unwrap(), &Column::I8(vec![0]));
    }

    #[test]
    fn test_duplicate_identity_is_merge_error() {
        let builder = BaseFeatureBuilder::new();
        let transactions = vec![TransactionRecord::new("1", 0.0, 1.0, "W")];
        let identities = vec![IdentityRecord::new("1"), IdentityRecord::new("1")];
        assert_eq!(
            builder.build(&transactions, &identities).unwrap_err(),
            MergeError::DuplicateIdentity("1".into())
        );
    }

    #[test]
    fn test_column_conflict_is_merge_error() {
        let builder = BaseFeatureBuilder::new();
        let transactions = vec![TransactionRecord::new("1", 0.0, 1.0, "W").with_field("card1", num(5.0))];
        let identities = vec![IdentityRecord::new("1").with_field("card1", num(6.0))];
        assert_eq!(
            builder.build(&transactions, &identities).unwrap_err(),
            MergeError::ColumnConflict("card1".into())
        );
    }

    #[test]
    fn test_minimal_frame() {
        let builder = BaseFeatureBuilder::new();
        let transactions = vec![TransactionRecord::new("1", 172_800.0, 100.256, "C")
            .with_field("P_emaildomain", text("gmail.com"))];
        let frame = builder.build_minimal(&transactions);

        assert_eq!(frame.column(DAY_INDEX).unwrap(), &Column::I32(vec![2]));
        assert_eq!(frame.column(HAS_IDENTITY).unwrap(), &Column::I8(vec![0]));
        assert_eq!(frame.column(EMAIL_MATCH).unwrap(), &Column::I8(vec![0]));
        assert!(frame.has_column(TRANSACTION_AMT));
        assert!(frame.has_column(PRODUCT_CD));
        assert!(!frame.has_column(DEVICE_NAME));
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = BaseFeatureBuilder::new();
        let transactions = vec![
            TransactionRecord::new("1", 5.0, 3.5, "W").with_field("card1", num(1.0)),
            TransactionRecord::new("2", 9.0, 4.5, "H").with_field("addr1", num(2.0)),
        ];
        let a = builder.build(&transactions, &[]).unwrap();
        let b = builder.build(&transactions, &[]).unwrap();
        assert_eq!(a.column_names(), b.column_names());
        for (name, column) in a.iter() {
            let other = b.column(name).unwrap();
            assert_eq!(column.column_type(), other.column_type());
            assert_eq!(column.to_f32_vec().len(), other.to_f32_vec().len());
        }
    }
}
