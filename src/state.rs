//! Process-wide model state.
//!
//! The artifact is loaded once at startup. A failed load leaves the
//! service up in the `Unavailable` state, where health probes report no
//! model and every scoring request is refused.

use crate::config::AppConfig;
use crate::error::ScoringError;
use crate::models::artifact::ModelArtifact;
use crate::scoring::ScoringAdapter;
use crate::types::prediction::HealthStatus;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

pub enum ModelState {
    Loaded(Arc<ScoringAdapter>),
    Unavailable { reason: String },
}

impl ModelState {
    /// Load the configured artifact. Never fails; a load error yields
    /// `Unavailable`.
    pub fn load(config: &AppConfig) -> Self {
        Self::load_from_path(&config.model.artifact_path, config.scoring.threshold)
    }

    pub fn load_from_path(path: &Path, threshold: f64) -> Self {
        match ModelArtifact::load(path) {
            Ok(artifact) => {
                info!(
                    path = %path.display(),
                    folds = artifact.models.len(),
                    threshold = threshold,
                    "Scoring model ready"
                );
                Self::from_artifact(artifact, threshold)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load model artifact");
                ModelState::Unavailable {
                    reason: format!("{}: {}", path.display(), e),
                }
            }
        }
    }

    pub fn from_artifact(artifact: ModelArtifact, threshold: f64) -> Self {
        ModelState::Loaded(Arc::new(ScoringAdapter::new(Arc::new(artifact), threshold)))
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelState::Loaded(_))
    }

    /// The shared adapter, or `ModelNotLoaded` for every caller while the
    /// artifact is unavailable.
    pub fn adapter(&self) -> Result<&Arc<ScoringAdapter>, ScoringError> {
        match self {
            ModelState::Loaded(adapter) => Ok(adapter),
            ModelState::Unavailable { reason } => Err(ScoringError::ModelNotLoaded(reason.clone())),
        }
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy".to_string(),
            model_loaded: self.is_loaded(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_artifact_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let state = ModelState::load_from_path(&dir.path().join("artifact.json"), 0.1);

        assert!(!state.is_loaded());
        assert_eq!(
            state.health(),
            HealthStatus {
                status: "healthy".into(),
                model_loaded: false
            }
        );
        assert!(matches!(state.adapter(), Err(ScoringError::ModelNotLoaded(_))));
        // refused on every call, not just the first
        assert!(state.adapter().is_err());
    }

    #[test]
    fn test_corrupt_artifact_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        std::fs::write(&path, b"{\"models\": 3}").unwrap();
        let state = ModelState::load_from_path(&path, 0.1);
        match state {
            ModelState::Unavailable { reason } => assert!(reason.contains("artifact.json")),
            ModelState::Loaded(_) => panic!("corrupt artifact loaded"),
        }
    }
}
