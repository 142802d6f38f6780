//! Persisted model bundle: fold models, feature list and encoders.

use crate::error::ArtifactError;
use crate::features::encoder::Encoder;
use crate::frame::FeatureSchema;
use crate::models::learner::{BoostedTrees, Predictor};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Value used at scoring time for features a request cannot provide.
pub const NEUTRAL_DEFAULT: f32 = 0.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub artifact_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub n_folds: usize,
    pub oof_auc: Option<f64>,
    pub fold_auc: Vec<Option<f64>>,
    pub best_iterations: Vec<usize>,
}

impl ArtifactMetadata {
    pub fn new(n_folds: usize) -> Self {
        Self {
            artifact_id: Uuid::new_v4(),
            created_at: Utc::now(),
            n_folds,
            oof_auc: None,
            fold_auc: Vec::new(),
            best_iterations: Vec::new(),
        }
    }
}

/// Everything the scorer needs, written once by training.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "M: Serialize", deserialize = "M: DeserializeOwned"))]
pub struct ModelArtifact<M = BoostedTrees> {
    pub models: Vec<M>,
    /// Ordered feature names the models were trained on
    pub features: Vec<String>,
    pub encoders: BTreeMap<String, Encoder>,
    pub metadata: ArtifactMetadata,
}

impl<M> ModelArtifact<M> {
    /// Feature layout with the neutral default for every slot.
    pub fn schema(&self) -> FeatureSchema {
        FeatureSchema::with_default(self.features.iter().cloned(), NEUTRAL_DEFAULT)
    }
}

impl<M: Predictor> ModelArtifact<M> {
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.models.is_empty() {
            return Err(ArtifactError::Integrity("artifact holds no models".into()));
        }
        if self.features.is_empty() {
            return Err(ArtifactError::Integrity("artifact feature list is empty".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.features.iter().find(|f| !seen.insert(f.as_str())) {
            return Err(ArtifactError::Integrity(format!("feature {dup} listed twice")));
        }
        if self.metadata.n_folds != self.models.len() {
            return Err(ArtifactError::Integrity(format!(
                "metadata declares {} folds but {} models are stored",
                self.metadata.n_folds,
                self.models.len()
            )));
        }
        for (fold, model) in self.models.iter().enumerate() {
            model
                .check()
                .map_err(|e| ArtifactError::Integrity(format!("fold {fold} model: {e}")))?;
        }
        Ok(())
    }
}

impl<M: Serialize + Predictor> ModelArtifact<M> {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ArtifactError> {
        let path = path.as_ref();
        self.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;

        info!(
            path = %path.display(),
            models = self.models.len(),
            features = self.features.len(),
            encoders = self.encoders.len(),
            "Model artifact written"
        );
        Ok(())
    }
}

impl<M: DeserializeOwned + Predictor> ModelArtifact<M> {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let artifact: Self = serde_json::from_reader(reader)?;
        artifact.validate()?;

        info!(
            path = %path.display(),
            artifact_id = %artifact.metadata.artifact_id,
            models = artifact.models.len(),
            features = artifact.features.len(),
            "Model artifact loaded"
        );
        Ok(artifact)
    }
}
