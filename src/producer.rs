//! NATS publishing of score responses

use crate::types::prediction::ScoreResponse;
use anyhow::Result;
use async_nats::Client;
use serde::Serialize;
use tracing::debug;

/// Publishes responses to the result subject and answers requesters
#[derive(Clone)]
pub struct ResultProducer {
    client: Client,
    subject: String,
}

impl ResultProducer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish a response on the result subject
    pub async fn publish(&self, response: &ScoreResponse) -> Result<()> {
        let payload = serde_json::to_vec(response)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            request_id = %response.request_id,
            results = response.results.len(),
            degraded = response.degraded,
            "Published score response"
        );

        Ok(())
    }

    /// Send a JSON reply to a request's reply subject
    pub async fn reply<T: Serialize>(&self, reply_subject: &str, body: &T) -> Result<()> {
        let payload = serde_json::to_vec(body)?;
        self.client
            .publish(reply_subject.to_string(), payload.into())
            .await?;
        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}
