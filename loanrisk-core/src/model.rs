//! Risk model backends
//!
//! Provides a `RiskModel` trait with implementations for:
//! - **linear** - logistic scorer read from a JSON artifact
//! - **onnx** - exported classifier run locally through ONNX Runtime

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ModelConfig;
use crate::schema::FeatureRow;

// ============================================================================
// RiskModel trait
// ============================================================================

/// Abstraction over a pre-trained binary classifier.
#[async_trait]
pub trait RiskModel: Send + Sync {
    /// Predicted class index. Well-behaved models only return 0 or 1; callers
    /// must not assume it.
    async fn predict(&self, row: &FeatureRow) -> Result<i64, ModelError>;

    /// Score of class index 1.
    async fn predict_probability(&self, row: &FeatureRow) -> Result<f64, ModelError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model artifact not found at {path}")]
    NotFound { path: String },

    #[error("invalid model artifact: {0}")]
    Artifact(String),

    #[error("unknown model backend: {0}")]
    UnknownBackend(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("invalid model output: {0}")]
    InvalidOutput(String),
}

/// Create the configured backend. Any error here means the service runs
/// without a model.
pub fn create_model(config: &ModelConfig) -> Result<Box<dyn RiskModel>, ModelError> {
    let path = config.resolved_path();
    match config.backend.as_str() {
        "linear" => Ok(Box::new(LinearRiskModel::from_file(&path)?)),
        "onnx" => Ok(Box::new(crate::onnx_model::OnnxRiskModel::new(
            &path,
            &config.onnx_input,
            config.onnx_label_output,
            config.onnx_probability_output,
        )?)),
        other => Err(ModelError::UnknownBackend(other.to_string())),
    }
}

pub(crate) fn ensure_exists(path: &Path) -> Result<(), ModelError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ModelError::NotFound {
            path: path.display().to_string(),
        })
    }
}

// ============================================================================
// LinearRiskModel
// ============================================================================

fn default_threshold() -> f64 {
    0.5
}

/// On-disk form of the linear scorer.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearArtifact {
    pub intercept: f64,
    pub coefficients: HashMap<String, f64>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

/// Logistic regression over named feature columns.
#[derive(Debug, Clone)]
pub struct LinearRiskModel {
    artifact: LinearArtifact,
    source: PathBuf,
}

impl LinearRiskModel {
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        ensure_exists(path)?;
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ModelError::Artifact(format!("{}: {e}", path.display())))?;
        let artifact: LinearArtifact = serde_json::from_str(&raw)
            .map_err(|e| ModelError::Artifact(format!("{}: {e}", path.display())))?;
        let mut model = Self::from_artifact(artifact)?;
        model.source = path.to_path_buf();
        Ok(model)
    }

    pub fn from_artifact(artifact: LinearArtifact) -> Result<Self, ModelError> {
        if !(0.0..=1.0).contains(&artifact.threshold) {
            return Err(ModelError::Artifact(format!(
                "threshold {} outside [0, 1]",
                artifact.threshold
            )));
        }
        Ok(Self {
            artifact,
            source: PathBuf::new(),
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    fn score(&self, row: &FeatureRow) -> Result<f64, ModelError> {
        let mut z = self.artifact.intercept;
        for (column, weight) in &self.artifact.coefficients {
            let value = row
                .get(column)
                .ok_or_else(|| ModelError::Inference(format!("unknown feature column `{column}`")))?;
            z += weight * value;
        }
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

#[async_trait]
impl RiskModel for LinearRiskModel {
    async fn predict(&self, row: &FeatureRow) -> Result<i64, ModelError> {
        let p = self.score(row)?;
        Ok(if p >= self.artifact.threshold { 1 } else { 0 })
    }

    async fn predict_probability(&self, row: &FeatureRow) -> Result<f64, ModelError> {
        self.score(row)
    }

    fn name(&self) -> &str {
        "linear"
    }
}

// ============================================================================
// TESTS
// ============================================================================
