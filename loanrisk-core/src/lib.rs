#![recursion_limit = "256"]
pub mod analytics;
pub mod config;
pub mod error;
pub mod eventlog;
pub mod events;
pub mod invoke;
pub mod model;
pub mod onnx_model;
pub mod schema;

pub use analytics::{HealthFlag, HttpMetrics, PredictionDistribution};
pub use config::LoanRiskConfig;
pub use error::LoanRiskError;
pub use eventlog::{EventLog, LogReader, LogRecord};
pub use events::{Event, Level, PredictionErrorEvent, PredictionEvent, RequestEvent};
pub use invoke::{
    invoke, InvokeError, PredictionErrorKind, PredictionLabel, PredictionResult,
    DEFAULTING_CLASS_INDEX, MODEL_UNAVAILABLE_MESSAGE,
};
pub use model::{create_model, LinearRiskModel, ModelError, RiskModel};
pub use onnx_model::OnnxRiskModel;
pub use schema::{FeatureRow, FieldError, LoanApplication, SchemaError};
