//! Scoring request and response payloads.

use crate::types::record::RawRow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-transaction scoring output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub transaction_id: String,
    pub amount: f64,
    /// Ensemble-averaged fraud probability (0.0 - 1.0)
    pub fraud_probability: f64,
    pub is_fraud: bool,
}

impl PredictionResult {
    pub fn new(transaction_id: String, amount: f64, fraud_probability: f64, threshold: f64) -> Self {
        Self {
            transaction_id,
            amount,
            fraud_probability,
            is_fraud: fraud_probability > threshold,
        }
    }
}

/// A batch of raw rows handed over by the transport layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub transactions: Vec<RawRow>,
    /// Identity rows, if the caller has any. `None` scores on the minimal
    /// feature set.
    #[serde(default)]
    pub identities: Option<Vec<RawRow>>,
}

/// Reply for one scoring request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub request_id: String,
    pub scored_at: DateTime<Utc>,
    pub results: Vec<PredictionResult>,
    /// True when the minimal feature set was used.
    pub degraded: bool,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScoreResponse {
    pub fn failed(request_id: String, error: String) -> Self {
        Self {
            request_id,
            scored_at: Utc::now(),
            results: Vec::new(),
            degraded: false,
            warnings: Vec::new(),
            error: Some(error),
        }
    }
}

/// Health probe reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_strict() {
        assert!(!PredictionResult::new("1".into(), 10.0, 0.1, 0.1).is_fraud);
        assert!(PredictionResult::new("1".into(), 10.0, 0.11, 0.1).is_fraud);
    }

    #[test]
    fn test_request_without_identities() {
        let json = r#"{"transactions": [{"TransactionID": 1}]}"#;
        let request: ScoreRequest = serde_json::from_str(json).unwrap();
        assert!(request.identities.is_none());
        assert!(request.request_id.is_none());
        assert_eq!(request.transactions.len(), 1);
    }

    #[test]
    fn test_failed_response_serialization() {
        let response = ScoreResponse::failed("req-1".into(), "model not loaded".into());
        let json = serde_json::to_string(&response).unwrap();
        let back: ScoreResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.error.as_deref(), Some("model not loaded"));
        assert!(back.results.is_empty());
    }
}
