//! Offline scoring of CSV files with a trained artifact.
//!
//! Usage: score-file <transactions.csv> [identity.csv] [output.csv]
//!
//! Without an identity file the batch is scored on the minimal feature set.

use anyhow::{Context, Result};
use fraud_scoring::{
    config::AppConfig,
    dataset::{read_rows, write_predictions},
    state::ModelState,
    types::record::{parse_identities, parse_transactions},
};
use tracing::{info, warn};

fn main() -> Result<()> {
    let config = AppConfig::load()?;
    config.logging.init_tracing()?;

    let args: Vec<String> = std::env::args().collect();
    let transactions_path = args
        .get(1)
        .context("usage: score-file <transactions.csv> [identity.csv] [output.csv]")?;
    let identity_path = args.get(2).filter(|p| !p.is_empty());
    let output_path = args.get(3).map(|s| s.as_str()).unwrap_or("predictions.csv");

    let state = ModelState::load(&config);
    let adapter = state.adapter()?;

    let transactions = parse_transactions(read_rows(transactions_path)?).context("Invalid transaction file")?;
    let identities = match identity_path {
        Some(path) => Some(parse_identities(read_rows(path)?).context("Invalid identity file")?),
        None => None,
    };

    let outcome = adapter.score_records(&transactions, identities.as_deref());
    for warning in &outcome.warnings {
        warn!(warning = %warning, "Scoring fallback");
    }

    write_predictions(output_path, &outcome.results)?;
    info!(
        rows = outcome.results.len(),
        flagged = outcome.flagged(),
        degraded = outcome.degraded,
        output = %output_path,
        "Scoring finished"
    );
    Ok(())
}
