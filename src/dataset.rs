//! CSV input and output for the batch jobs.

use crate::error::DatasetError;
use crate::types::prediction::PredictionResult;
use crate::types::record::{FieldValue, RawRow, TRANSACTION_ID};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

/// Read a headed CSV file into raw rows. Empty and `NaN` cells are missing.
pub fn read_rows<P: AsRef<Path>>(path: P) -> Result<Vec<RawRow>, DatasetError> {
    let path = path.as_ref();
    let file = fs::File::open(path)?;
    let rows = read_rows_from(io::BufReader::new(file))?;
    info!(path = %path.display(), rows = rows.len(), "CSV loaded");
    Ok(rows)
}

pub fn read_rows_from<R: io::Read>(reader: R) -> Result<Vec<RawRow>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .map(|(name, cell)| (name.to_string(), FieldValue::parse_cell(cell)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Remove the binary label column from every row.
pub fn take_labels(rows: &mut [RawRow], column: &str) -> Result<Vec<u8>, DatasetError> {
    rows.iter_mut()
        .enumerate()
        .map(|(row, values)| {
            let label = values.remove(column).flatten().and_then(|v| v.as_f64());
            match label {
                Some(v) if v == 0.0 => Ok(0),
                Some(v) if v == 1.0 => Ok(1),
                _ => Err(DatasetError::InvalidLabel {
                    row,
                    column: column.to_string(),
                }),
            }
        })
        .collect()
}

#[derive(Serialize)]
struct SubmissionRow<'a> {
    #[serde(rename = "TransactionID")]
    transaction_id: &'a str,
    #[serde(rename = "isFraud")]
    is_fraud: f64,
}

/// Write `TransactionID,isFraud` rows of averaged probabilities.
pub fn write_submission<P: AsRef<Path>>(path: P, ids: &[String], probabilities: &[f64]) -> Result<(), DatasetError> {
    let path = path.as_ref();
    let mut writer = csv_writer(path)?;
    for (id, &p) in ids.iter().zip(probabilities) {
        writer.serialize(SubmissionRow {
            transaction_id: id,
            is_fraud: p,
        })?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = ids.len(), column = TRANSACTION_ID, "Submission written");
    Ok(())
}

/// Write one CSV row per scored transaction.
pub fn write_predictions<P: AsRef<Path>>(path: P, results: &[PredictionResult]) -> Result<(), DatasetError> {
    let path = path.as_ref();
    let mut writer = csv_writer(path)?;
    for result in results {
        writer.serialize(result)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = results.len(), "Predictions written");
    Ok(())
}

fn csv_writer(path: &Path) -> Result<csv::Writer<fs::File>, DatasetError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(csv::Writer::from_path(path)?)
}
