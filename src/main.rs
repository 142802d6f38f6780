//! Fraud Scoring Service - Main Entry Point
//!
//! Answers score requests and health probes over NATS using the model
//! artifact loaded at startup. Requests are processed in parallel.

use anyhow::{bail, Context, Result};
use fraud_scoring::{
    config::AppConfig,
    consumer::RequestConsumer,
    metrics::{MetricsReporter, ScoringMetrics},
    producer::ResultProducer,
    state::ModelState,
    ScoreRequest, ScoreResponse,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    config.logging.init_tracing()?;

    info!("Starting Fraud Scoring Service");
    info!(
        threshold = config.scoring.threshold,
        artifact = %config.model.artifact_path.display(),
        "Configuration loaded"
    );

    // The artifact is loaded exactly once and never replaced
    let state = Arc::new(ModelState::load(&config));
    if !state.is_loaded() && config.model.require_loaded {
        bail!(
            "Model artifact {} could not be loaded",
            config.model.artifact_path.display()
        );
    }

    let metrics = Arc::new(ScoringMetrics::new());

    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = RequestConsumer::new(
        client.clone(),
        &config.nats.score_subject,
        &config.nats.health_subject,
    );
    let producer = Arc::new(ResultProducer::new(client.clone(), &config.nats.result_subject));

    // Health probes are cheap; answer them on their own task
    let mut health = consumer.subscribe_health().await?;
    let health_state = state.clone();
    let health_producer = producer.clone();
    tokio::spawn(async move {
        while let Some(message) = health.next().await {
            let Some(reply) = message.reply else { continue };
            if let Err(e) = health_producer.reply(&reply, &health_state.health()).await {
                warn!(error = %e, "Failed to answer health probe");
            }
        }
    });

    let metrics_clone = metrics.clone();
    let interval = config.pipeline.metrics_interval_secs;
    tokio::spawn(async move {
        MetricsReporter::new(metrics_clone, interval).start().await;
    });

    let num_workers = config.pipeline.workers.max(1);
    info!(
        "Starting request loop with {} parallel workers",
        num_workers
    );
    info!("Listening on subject: {}", consumer.score_subject());
    info!("Publishing results to: {}", producer.subject());

    // Semaphore to limit concurrent processing
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    let mut subscription = consumer.subscribe_scores().await?;

    while let Some(message) = subscription.next().await {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Worker semaphore closed")?;

        let state = state.clone();
        let producer = producer.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            let start_time = Instant::now();

            let response = match serde_json::from_slice::<ScoreRequest>(&message.payload) {
                Ok(mut request) => {
                    let request_id = request
                        .request_id
                        .take()
                        .unwrap_or_else(|| Uuid::new_v4().to_string());
                    let scored = state.adapter().and_then(|adapter| adapter.score(request));

                    match scored {
                        Ok(outcome) => {
                            let processing_time = start_time.elapsed();
                            metrics.record_outcome(&outcome, processing_time);
                            debug!(
                                request_id = %request_id,
                                rows = outcome.results.len(),
                                flagged = outcome.flagged(),
                                degraded = outcome.degraded,
                                processing_time_us = processing_time.as_micros(),
                                "Batch scored"
                            );

                            ScoreResponse {
                                request_id,
                                scored_at: chrono::Utc::now(),
                                degraded: outcome.degraded,
                                warnings: outcome.warnings.iter().map(|w| w.to_string()).collect(),
                                results: outcome.results,
                                error: None,
                            }
                        }
                        Err(e) => {
                            metrics.record_rejected();
                            warn!(request_id = %request_id, error = %e, "Batch rejected");
                            ScoreResponse::failed(request_id, e.to_string())
                        }
                    }
                }
                Err(e) => {
                    metrics.record_rejected();
                    warn!(error = %e, "Failed to deserialize score request");
                    ScoreResponse::failed(Uuid::new_v4().to_string(), format!("invalid request: {e}"))
                }
            };

            if let Some(reply) = &message.reply {
                if let Err(e) = producer.reply(reply, &response).await {
                    error!(request_id = %response.request_id, error = %e, "Failed to send reply");
                }
            }
            if let Err(e) = producer.publish(&response).await {
                error!(request_id = %response.request_id, error = %e, "Failed to publish result");
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                let processing_stats = metrics.get_processing_stats();
                info!(
                    processed = count,
                    throughput = format!("{:.1} rows/s", metrics.get_throughput()),
                    avg_latency_us = processing_stats.mean_us,
                    "Processing milestone"
                );
            }

            drop(permit);
        });
    }

    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}
