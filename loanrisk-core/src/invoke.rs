//! Prediction invoker: turns an optional model and a validated application
//! into a labelled, rounded prediction.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::RiskModel;
use crate::schema::LoanApplication;

/// Class index the model uses for a defaulting applicant.
pub const DEFAULTING_CLASS_INDEX: i64 = 1;

/// Class index of a solvent applicant.
pub const SOLVENT_CLASS_INDEX: i64 = 0;

/// Fixed response text when no model is loaded.
pub const MODEL_UNAVAILABLE_MESSAGE: &str = "Modèle non chargé";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredictionLabel {
    #[serde(rename = "Solvable")]
    Solvent,
    #[serde(rename = "Défaillant")]
    Defaulting,
}

impl PredictionLabel {
    pub fn from_class_index(index: i64) -> Option<Self> {
        match index {
            DEFAULTING_CLASS_INDEX => Some(Self::Defaulting),
            SOLVENT_CLASS_INDEX => Some(Self::Solvent),
            _ => None,
        }
    }

    /// User-facing name, as serialized.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Solvent => "Solvable",
            Self::Defaulting => "Défaillant",
        }
    }
}

impl std::fmt::Display for PredictionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionResult {
    pub label: PredictionLabel,
    /// Class-1 score, rounded to 4 decimals.
    pub default_probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionErrorKind {
    ModelUnavailable,
    PredictionFailure,
}

#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("{}", MODEL_UNAVAILABLE_MESSAGE)]
    ModelUnavailable,

    /// `diagnostic` is the full error chain, for the event log only.
    #[error("prediction failed: {message}")]
    PredictionFailure { message: String, diagnostic: String },
}

impl InvokeError {
    pub fn kind(&self) -> PredictionErrorKind {
        match self {
            Self::ModelUnavailable => PredictionErrorKind::ModelUnavailable,
            Self::PredictionFailure { .. } => PredictionErrorKind::PredictionFailure,
        }
    }

    pub fn diagnostic(&self) -> String {
        match self {
            Self::ModelUnavailable => MODEL_UNAVAILABLE_MESSAGE.to_string(),
            Self::PredictionFailure { diagnostic, .. } => diagnostic.clone(),
        }
    }

    fn failure(err: anyhow::Error) -> Self {
        Self::PredictionFailure {
            message: err.to_string(),
            diagnostic: format!("{err:?}"),
        }
    }
}

pub fn round_probability(p: f64) -> f64 {
    (p * 10_000.0).round() / 10_000.0
}

/// Apply `model` to `application`. An absent model fails immediately and is
/// never retried.
pub async fn invoke(
    model: Option<&dyn RiskModel>,
    application: &LoanApplication,
) -> Result<PredictionResult, InvokeError> {
    let model = model.ok_or(InvokeError::ModelUnavailable)?;
    let row = application.to_feature_row();

    let index = model.predict(&row).await.map_err(|e| {
        InvokeError::failure(anyhow::Error::new(e).context(format!("{} model: predict", model.name())))
    })?;
    let label = PredictionLabel::from_class_index(index).ok_or_else(|| {
        InvokeError::failure(anyhow!(
            "{} model returned class index {index}, expected {SOLVENT_CLASS_INDEX} or {DEFAULTING_CLASS_INDEX}",
            model.name()
        ))
    })?;

    let probability = model.predict_probability(&row).await.map_err(|e| {
        InvokeError::failure(
            anyhow::Error::new(e).context(format!("{} model: predict_probability", model.name())),
        )
    })?;
    if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
        return Err(InvokeError::failure(anyhow!(
            "{} model returned probability {probability}, expected a value in [0, 1]",
            model.name()
        )));
    }

    Ok(PredictionResult {
        label,
        default_probability: round_probability(probability),
    })
}

// ============================================================================
// TESTS
// ============================================================================
