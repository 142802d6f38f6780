//! Batch Request Producer
//!
//! Generates synthetic transaction batches and sends them to the scoring
//! service over NATS, logging the replies.
//!
//! Usage: batch-producer [nats_url] [subject] [batches] [batch_size] [fraud_rate] [delay_ms]

use fraud_scoring::types::record::{FieldValue, RawRow};
use fraud_scoring::{ScoreRequest, ScoreResponse};
use rand::rngs::ThreadRng;
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

/// Synthetic transaction generator
struct BatchGenerator {
    rng: ThreadRng,
    transaction_counter: u64,
    /// Seconds since the dataset reference point
    clock: f64,
}

impl BatchGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            transaction_counter: 3_663_549,
            clock: 18_403_224.0,
        }
    }

    fn batch(&mut self, size: usize, fraud_rate: f64, with_identity: bool) -> ScoreRequest {
        let mut transactions = Vec::with_capacity(size);
        let mut identities = Vec::new();

        for _ in 0..size {
            let suspicious = self.rng.gen_bool(fraud_rate);
            let (transaction, identity) = if suspicious {
                self.generate_suspicious()
            } else {
                self.generate_legitimate()
            };
            transactions.push(transaction);
            if let Some(identity) = identity {
                identities.push(identity);
            }
        }

        ScoreRequest {
            request_id: Some(format!("batch_{}", self.transaction_counter)),
            transactions,
            identities: with_identity.then_some(identities),
        }
    }

    /// Small card-present style purchase, identity only sometimes
    fn generate_legitimate(&mut self) -> (RawRow, Option<RawRow>) {
        let amount = (self.rng.gen_range(10.0..250.0_f64) * 100.0).round() / 100.0;
        let product = self.random_choice(&["W", "W", "W", "H", "R"]);
        let card4 = self.random_choice(&["visa", "mastercard"]);
        let email = self.random_choice(&["gmail.com", "yahoo.com", "hotmail.com", "anonymous.com"]);
        let mut row = self.base_row(amount, product);
        row.insert("card1".into(), num(self.rng.gen_range(1000..18000) as f64));
        row.insert("card4".into(), text(card4));
        row.insert("addr1".into(), num(self.rng.gen_range(100..540) as f64));
        row.insert("P_emaildomain".into(), text(email));

        let identity = if self.rng.gen_bool(0.2) {
            let device = self.random_choice(&["Windows", "iOS Device", "MacOS"]);
            Some(self.identity_row(device))
        } else {
            None
        };
        (row, identity)
    }

    /// Larger online purchase with an identity record and mismatched emails
    fn generate_suspicious(&mut self) -> (RawRow, Option<RawRow>) {
        let amount = (self.rng.gen_range(300.0..3000.0_f64) * 100.0).round() / 100.0;
        let card4 = self.random_choice(&["discover", "visa", "american express"]);
        let mut row = self.base_row(amount, "C");
        row.insert("card1".into(), num(self.rng.gen_range(1000..18000) as f64));
        row.insert("card4".into(), text(card4));
        row.insert("P_emaildomain".into(), text("outlook.com"));
        row.insert("R_emaildomain".into(), text("protonmail.com"));

        let device = self.random_choice(&["SM-G930V Build/NRD90M", "rv:11.0", "Moto G (4) Build/NPJ25.93-14"]);
        (row, Some(self.identity_row(device)))
    }

    fn base_row(&mut self, amount: f64, product: &str) -> RawRow {
        self.transaction_counter += 1;
        self.clock += self.rng.gen_range(1.0..120.0_f64).floor();

        let mut row = RawRow::new();
        row.insert("TransactionID".into(), num(self.transaction_counter as f64));
        row.insert("TransactionDT".into(), num(self.clock));
        row.insert("TransactionAmt".into(), num(amount));
        row.insert("ProductCD".into(), text(product));
        row
    }

    fn identity_row(&mut self, device: &str) -> RawRow {
        let mut row = RawRow::new();
        row.insert("TransactionID".into(), num(self.transaction_counter as f64));
        row.insert("id-01".into(), num(-5.0 * self.rng.gen_range(0..10) as f64));
        row.insert("DeviceInfo".into(), text(device));
        row
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

fn num(v: f64) -> Option<FieldValue> {
    Some(FieldValue::Number(v))
}

fn text(s: &str) -> Option<FieldValue> {
    Some(FieldValue::Text(s.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("batch_producer=info".parse()?),
        )
        .init();

    info!("Starting Batch Request Producer");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("fraud.score");
    let batches: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(20);
    let batch_size: usize = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(25);
    let fraud_rate: f64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(0.05);
    let delay_ms: u64 = args.get(6).and_then(|s| s.parse().ok()).unwrap_or(250);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        batches = batches,
        batch_size = batch_size,
        fraud_rate = fraud_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(batches, batch_size, fraud_rate).await;
        }
    };

    let mut generator = BatchGenerator::new();
    let mut flagged_total = 0usize;
    let mut rows_total = 0usize;

    for i in 0..batches {
        // every other batch comes without identity data
        let request = generator.batch(batch_size, fraud_rate, i % 2 == 0);
        let payload = serde_json::to_vec(&request)?;

        match client.request(subject.to_string(), payload.into()).await {
            Ok(message) => match serde_json::from_slice::<ScoreResponse>(&message.payload) {
                Ok(response) => {
                    let flagged = response.results.iter().filter(|r| r.is_fraud).count();
                    flagged_total += flagged;
                    rows_total += response.results.len();
                    info!(
                        request_id = %response.request_id,
                        rows = response.results.len(),
                        flagged = flagged,
                        degraded = response.degraded,
                        warnings = response.warnings.len(),
                        error = ?response.error,
                        "Batch {}/{} scored",
                        i + 1,
                        batches
                    );
                }
                Err(e) => warn!(error = %e, "Unreadable reply"),
            },
            Err(e) => warn!(error = %e, "Request failed"),
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! {} rows scored, {} flagged",
        rows_total, flagged_total
    );

    Ok(())
}

async fn run_dry_mode(batches: u64, batch_size: usize, fraud_rate: f64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = BatchGenerator::new();
    for i in 0..batches.min(3) {
        let request = generator.batch(batch_size.min(3), fraud_rate, true);
        let json = serde_json::to_string_pretty(&request)?;
        info!("Sample request {}:\n{}", i + 1, json);
    }

    Ok(())
}
