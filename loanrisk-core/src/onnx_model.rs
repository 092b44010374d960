//! ONNX risk model backend
//!
//! Runs a classifier exported to ONNX (e.g. from scikit-learn with
//! `zipmap=False`) through the `ort` crate. The model takes one float tensor
//! of shape `[1, n_columns]` in feature-row order and yields an int64 label
//! tensor plus a float `[1, 2]` probability tensor.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;

use crate::model::{ensure_exists, ModelError, RiskModel};
use crate::schema::FeatureRow;

pub struct OnnxRiskModel {
    session: Arc<Mutex<Session>>,
    input_name: String,
    label_output: usize,
    probability_output: usize,
}

impl std::fmt::Debug for OnnxRiskModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxRiskModel")
            .field("input_name", &self.input_name)
            .field("label_output", &self.label_output)
            .field("probability_output", &self.probability_output)
            .finish_non_exhaustive()
    }
}

/// Raw outputs of one session run.
struct Scored {
    label: i64,
    probability: f64,
}

impl OnnxRiskModel {
    /// Load the model. Returns `ModelError::NotFound` if the file is missing.
    pub fn new(
        path: &Path,
        input_name: &str,
        label_output: usize,
        probability_output: usize,
    ) -> Result<Self, ModelError> {
        ensure_exists(path)?;

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| ModelError::Artifact(e.to_string()))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            input_name: input_name.to_string(),
            label_output,
            probability_output,
        })
    }

    async fn score(&self, row: &FeatureRow) -> Result<Scored, ModelError> {
        // Inference is CPU-bound; keep it off the async workers.
        let session = Arc::clone(&self.session);
        let input_name = self.input_name.clone();
        let label_output = self.label_output;
        let probability_output = self.probability_output;
        let dense = row.to_dense();

        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|e| ModelError::Inference(format!("session lock poisoned: {e}")))?;
            score_sync(&mut guard, &input_name, dense, label_output, probability_output)
        })
        .await
        .map_err(|e| ModelError::Inference(format!("spawn_blocking join error: {e}")))?
    }
}

#[async_trait]
impl RiskModel for OnnxRiskModel {
    async fn predict(&self, row: &FeatureRow) -> Result<i64, ModelError> {
        self.score(row).await.map(|s| s.label)
    }

    async fn predict_probability(&self, row: &FeatureRow) -> Result<f64, ModelError> {
        self.score(row).await.map(|s| s.probability)
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

fn score_sync(
    session: &mut Session,
    input_name: &str,
    dense: Vec<f32>,
    label_output: usize,
    probability_output: usize,
) -> Result<Scored, ModelError> {
    let shape = vec![1i64, dense.len() as i64];
    let input = Tensor::from_array((shape, dense))
        .map_err(|e| ModelError::Inference(e.to_string()))?;

    let inputs = ort::inputs! {
        input_name => input,
    };

    let outputs = session
        .run(inputs)
        .map_err(|e| ModelError::Inference(e.to_string()))?;

    let available = outputs.len();
    if label_output >= available || probability_output >= available {
        return Err(ModelError::InvalidOutput(format!(
            "model has {available} outputs, configured label={label_output} probability={probability_output}"
        )));
    }

    let (_, labels) = outputs[label_output]
        .try_extract_tensor::<i64>()
        .map_err(|e| ModelError::InvalidOutput(format!("label tensor: {e}")))?;
    let label = *labels
        .first()
        .ok_or_else(|| ModelError::InvalidOutput("empty label tensor".to_string()))?;

    // Shape [1, 2]: column 1 is the class-1 score.
    let (_, probabilities) = outputs[probability_output]
        .try_extract_tensor::<f32>()
        .map_err(|e| ModelError::InvalidOutput(format!("probability tensor: {e}")))?;
    let probability = *probabilities.get(1).ok_or_else(|| {
        ModelError::InvalidOutput(format!(
            "expected 2 class probabilities, got {}",
            probabilities.len()
        ))
    })?;

    Ok(Scored {
        label,
        probability: probability as f64,
    })
}
