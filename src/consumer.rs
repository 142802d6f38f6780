//! NATS subscriptions for score requests and health probes

use anyhow::{Context, Result};
use async_nats::{Client, Subscriber};
use tracing::info;

/// Subscribes to the request/reply subjects served by the scoring service
pub struct RequestConsumer {
    client: Client,
    score_subject: String,
    health_subject: String,
}

impl RequestConsumer {
    pub fn new(client: Client, score_subject: &str, health_subject: &str) -> Self {
        Self {
            client,
            score_subject: score_subject.to_string(),
            health_subject: health_subject.to_string(),
        }
    }

    /// Subscribe to score requests
    pub async fn subscribe_scores(&self) -> Result<Subscriber> {
        let subscriber = self
            .client
            .subscribe(self.score_subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.score_subject))?;
        info!(subject = %self.score_subject, "Subscribed to score requests");
        Ok(subscriber)
    }

    /// Subscribe to health probes
    pub async fn subscribe_health(&self) -> Result<Subscriber> {
        let subscriber = self
            .client
            .subscribe(self.health_subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.health_subject))?;
        info!(subject = %self.health_subject, "Subscribed to health probes");
        Ok(subscriber)
    }

    pub fn score_subject(&self) -> &str {
        &self.score_subject
    }

    pub fn health_subject(&self) -> &str {
        &self.health_subject
    }
}
