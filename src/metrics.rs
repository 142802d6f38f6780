//! Scoring statistics for the service: volumes, fallbacks, latency and
//! score distribution.

use crate::scoring::ScoreOutcome;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector shared by all request tasks
pub struct ScoringMetrics {
    /// Batches scored successfully
    pub batches_scored: AtomicU64,
    /// Batches rejected before scoring
    pub batches_rejected: AtomicU64,
    /// Batches scored on the minimal feature set
    pub batches_degraded: AtomicU64,
    pub rows_scored: AtomicU64,
    pub rows_flagged: AtomicU64,
    /// Default-code fallbacks by column
    unseen_by_column: RwLock<HashMap<String, u64>>,
    /// Batch latencies (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Probability distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    /// Mean fold-model spread per batch
    fold_spreads: RwLock<Vec<f64>>,
    start_time: Instant,
}

impl ScoringMetrics {
    pub fn new() -> Self {
        Self {
            batches_scored: AtomicU64::new(0),
            batches_rejected: AtomicU64::new(0),
            batches_degraded: AtomicU64::new(0),
            rows_scored: AtomicU64::new(0),
            rows_flagged: AtomicU64::new(0),
            unseen_by_column: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            fold_spreads: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a scored batch
    pub fn record_outcome(&self, outcome: &ScoreOutcome, processing_time: Duration) {
        self.batches_scored.fetch_add(1, Ordering::Relaxed);
        self.rows_scored
            .fetch_add(outcome.results.len() as u64, Ordering::Relaxed);
        self.rows_flagged
            .fetch_add(outcome.flagged() as u64, Ordering::Relaxed);
        if outcome.degraded {
            self.batches_degraded.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only the most recent samples
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        if let Ok(mut buckets) = self.score_buckets.write() {
            for result in &outcome.results {
                let bucket = (result.fraud_probability * 10.0).clamp(0.0, 9.0) as usize;
                buckets[bucket] += 1;
            }
        }

        if let Ok(mut unseen) = self.unseen_by_column.write() {
            for column in outcome.unseen_columns() {
                *unseen.entry(column.to_string()).or_insert(0) += 1;
            }
        }

        if !outcome.results.is_empty() {
            if let Ok(mut spreads) = self.fold_spreads.write() {
                spreads.push(outcome.fold_spread);
                if spreads.len() > 1000 {
                    spreads.drain(0..500);
                }
            }
        }
    }

    /// Record a batch rejected for its shape or because no model is loaded
    pub fn record_rejected(&self) {
        self.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_processing_stats(&self) -> ProcessingStats {
        let Ok(times) = self.processing_times.read() else {
            return ProcessingStats::default();
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: sorted[count - 1],
        }
    }

    /// Fold agreement: 1 minus the mean fold spread (higher = folds agree more)
    pub fn get_fold_agreement(&self) -> f64 {
        let Ok(spreads) = self.fold_spreads.read() else {
            return 0.0;
        };
        if spreads.is_empty() {
            return 0.0;
        }
        let mean = spreads.iter().sum::<f64>() / spreads.len() as f64;
        1.0 - mean.min(1.0)
    }

    /// Rows scored per second since startup
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.rows_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or_default()
    }

    pub fn get_unseen_by_column(&self) -> HashMap<String, u64> {
        self.unseen_by_column
            .read()
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let batches = self.batches_scored.load(Ordering::Relaxed);
        let rejected = self.batches_rejected.load(Ordering::Relaxed);
        let degraded = self.batches_degraded.load(Ordering::Relaxed);
        let rows = self.rows_scored.load(Ordering::Relaxed);
        let flagged = self.rows_flagged.load(Ordering::Relaxed);
        let flag_rate = if rows > 0 {
            (flagged as f64 / rows as f64) * 100.0
        } else {
            0.0
        };

        let processing = self.get_processing_stats();
        let score_dist = self.get_score_distribution();

        info!(
            batches = batches,
            rejected = rejected,
            degraded = degraded,
            rows = rows,
            flagged = flagged,
            flag_rate_pct = format!("{:.2}", flag_rate),
            throughput = format!("{:.1} rows/s", self.get_throughput()),
            "Scoring summary"
        );
        info!(
            mean_us = processing.mean_us,
            p50_us = processing.p50_us,
            p95_us = processing.p95_us,
            p99_us = processing.p99_us,
            max_us = processing.max_us,
            fold_agreement = format!("{:.3}", self.get_fold_agreement()),
            "Batch latency"
        );

        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            info!(
                "  p {:.1}-{:.1}: {:>8} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                "█".repeat(((pct / 2.0) as usize).min(50))
            );
        }

        for (column, count) in &self.get_unseen_by_column() {
            info!(column = %column, batches = count, "Unseen-category fallbacks");
        }
    }
}

impl Default for ScoringMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Prints a metrics summary on a fixed interval
pub struct MetricsReporter {
    metrics: Arc<ScoringMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ScoringMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
