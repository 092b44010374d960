use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoanRiskError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model error: {0}")]
    Model(#[from] crate::model::ModelError),

    #[error("Other error: {0}")]
    Other(String),
}
