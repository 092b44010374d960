//! LoanRisk HTTP API
//!
//! Axum-based server exposing the risk model and the analytics derived from
//! its event log. Each endpoint has a thin axum handler that delegates to an
//! inner function returning `(StatusCode, serde_json::Value)`, so the logic is
//! testable without the dispatch machinery.
//!
//! Endpoints:
//! - GET  /                       - capability listing
//! - GET  /health                 - liveness and model status
//! - POST /predict                - score one loan application
//! - GET  /logs                   - raw event log (text/plain)
//! - GET  /analytics/predictions  - prediction distribution
//! - GET  /analytics/http         - latency, error rate and anomalies

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use loanrisk_core::analytics::{MAX_BINS, MAX_RECENT};
use loanrisk_core::{
    invoke, Event, EventLog, HttpMetrics, InvokeError, LoanApplication, LoanRiskConfig, LogReader,
    PredictionDistribution, PredictionErrorEvent, PredictionEvent, RiskModel, SchemaError,
    MODEL_UNAVAILABLE_MESSAGE,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::envelope::{envelope_middleware, RequestContext};

/// Response text for a failed invocation. Never carries model internals.
pub const INVALID_INPUT_MESSAGE: &str = "Données d'entrée invalides";

const DEFAULT_BINS: usize = 10;
const DEFAULT_RECENT: usize = 10;

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub config: LoanRiskConfig,
    pub model: Option<Arc<dyn RiskModel>>,
    pub event_log: Arc<EventLog>,
}

/// Build the Axum router with all endpoints, each wrapped in a request envelope.
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/predict", post(predict_handler))
        .route("/logs", get(logs_handler))
        .route("/analytics/predictions", get(prediction_analytics_handler))
        .route("/analytics/http", get(http_analytics_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            envelope_middleware,
        ))
        .with_state(state)
}

/// Serve on the configured address until the shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = state.config.http_addr();
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("LoanRisk HTTP API listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
        tracing::info!("HTTP server shutting down...");
    })
    .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct PredictionAnalyticsQuery {
    pub bins: Option<usize>,
    pub recent: Option<usize>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub fn root_inner() -> Value {
    json!({
        "message": "Bienvenue dans l'API de prédiction de solvabilité des clients",
        "description": "Cette API utilise un modèle de Machine Learning pour prédire si un client est solvable ou défaillant",
        "endpoints": {
            "prediction": "POST /predict",
            "health": "GET /health",
            "logs": "GET /logs",
            "prediction_analytics": "GET /analytics/predictions",
            "http_analytics": "GET /analytics/http",
        },
    })
}

pub fn health_inner(state: &HttpState) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "model_loaded": state.model.is_some(),
            "model_backend": state.model.as_ref().map(|m| m.name().to_string()),
            "event_log": state.event_log.path().display().to_string(),
        }),
    )
}

/// Validate, score and record one application. The raw body is logged as
/// received on success.
pub async fn predict_inner(
    model: Option<&dyn RiskModel>,
    ctx: &RequestContext,
    raw: Value,
) -> (StatusCode, Value) {
    let application = match LoanApplication::from_json(&raw) {
        Ok(a) => a,
        Err(e) => return schema_error_response(e),
    };

    match invoke(model, &application).await {
        Ok(result) => {
            ctx.record(Event::Prediction(PredictionEvent {
                request_id: ctx.request_id,
                input_record: raw,
                prediction_label: result.label,
                default_probability: result.default_probability,
            }));
            (
                StatusCode::OK,
                json!({
                    "prediction": result.label,
                    "probabilité_defaut": result.default_probability,
                }),
            )
        }
        Err(err) => {
            tracing::error!(
                request_id = %ctx.request_id,
                kind = ?err.kind(),
                error = %err,
                "Prediction failed"
            );
            ctx.record(Event::PredictionError(PredictionErrorEvent {
                request_id: ctx.request_id,
                error_message: err.to_string(),
                stack_trace: err.diagnostic(),
                kind: err.kind(),
            }));
            match err {
                InvokeError::ModelUnavailable => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": MODEL_UNAVAILABLE_MESSAGE }),
                ),
                InvokeError::PredictionFailure { .. } => (
                    StatusCode::BAD_REQUEST,
                    json!({ "detail": INVALID_INPUT_MESSAGE }),
                ),
            }
        }
    }
}

pub fn schema_error_response(err: SchemaError) -> (StatusCode, Value) {
    (StatusCode::UNPROCESSABLE_ENTITY, json!({ "detail": err.0 }))
}

/// Raw live log; empty when nothing has been written yet.
pub async fn logs_inner(path: PathBuf) -> (StatusCode, String) {
    let read = tokio::task::spawn_blocking(move || LogReader::new(path).read_raw()).await;
    match read {
        Ok(Ok(contents)) => (StatusCode::OK, contents),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to read event log");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to read logs: {e}"))
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to read logs: {e}")),
    }
}

pub async fn prediction_analytics_inner(
    path: PathBuf,
    query: PredictionAnalyticsQuery,
) -> (StatusCode, Value) {
    let bins = query.bins.unwrap_or(DEFAULT_BINS).min(MAX_BINS);
    let recent = query.recent.unwrap_or(DEFAULT_RECENT).min(MAX_RECENT);
    let computed = tokio::task::spawn_blocking(move || {
        let events = LogReader::new(path).read_events();
        let dist = PredictionDistribution::from_events(&events);
        let mut body = serde_json::to_value(&dist)?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("histogram".to_string(), serde_json::to_value(dist.bucket(bins))?);
            obj.insert("recent".to_string(), serde_json::to_value(dist.recent(recent))?);
        }
        Ok::<Value, serde_json::Error>(body)
    })
    .await;
    analytics_response(computed)
}

pub async fn http_analytics_inner(path: PathBuf) -> (StatusCode, Value) {
    let computed = tokio::task::spawn_blocking(move || {
        let events = LogReader::new(path).read_events();
        serde_json::to_value(HttpMetrics::from_events(&events))
    })
    .await;
    analytics_response(computed)
}

fn analytics_response(
    computed: std::result::Result<std::result::Result<Value, serde_json::Error>, tokio::task::JoinError>,
) -> (StatusCode, Value) {
    match computed {
        Ok(Ok(body)) => (StatusCode::OK, body),
        Ok(Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "detail": format!("analytics serialization failed: {e}") }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "detail": format!("analytics task failed: {e}") }),
        ),
    }
}

// ============================================================================
// Axum handler wrappers (thin - delegate to inner functions)
// ============================================================================

pub async fn root_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(root_inner()))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state);
    (status, Json(body))
}

pub async fn predict_handler(
    State(state): State<Arc<HttpState>>,
    Extension(ctx): Extension<RequestContext>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match body {
        Ok(Json(raw)) => predict_inner(state.model.as_deref(), &ctx, raw).await,
        Err(rejection) => schema_error_response(SchemaError::malformed(rejection.body_text())),
    };
    (status, Json(body))
}

pub async fn logs_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = logs_inner(state.event_log.path().to_path_buf()).await;
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}

pub async fn prediction_analytics_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<PredictionAnalyticsQuery>,
) -> impl IntoResponse {
    let (status, body) =
        prediction_analytics_inner(state.event_log.path().to_path_buf(), query).await;
    (status, Json(body))
}

pub async fn http_analytics_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = http_analytics_inner(state.event_log.path().to_path_buf()).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests - call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeHandle;
    use async_trait::async_trait;
    use loanrisk_core::{FeatureRow, ModelError};

    struct FixedModel(i64, f64);

    #[async_trait]
    impl RiskModel for FixedModel {
        async fn predict(&self, _row: &FeatureRow) -> Result<i64, ModelError> {
            Ok(self.0)
        }

        async fn predict_probability(&self, _row: &FeatureRow) -> Result<f64, ModelError> {
            Ok(self.1)
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn state(dir: &tempfile::TempDir, model: Option<Arc<dyn RiskModel>>) -> HttpState {
        HttpState {
            config: LoanRiskConfig::default(),
            model,
            event_log: Arc::new(EventLog::new(dir.path().join("api.log"), 1024 * 1024, 1)),
        }
    }

    #[test]
    fn test_root_lists_predict() {
        let body = root_inner();
        assert_eq!(body["endpoints"]["prediction"], "POST /predict");
        assert!(body["message"].as_str().unwrap().starts_with("Bienvenue"));
    }

    #[test]
    fn test_health_reports_model() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = health_inner(&state(&dir, None));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model_loaded"], false);
        assert!(body["model_backend"].is_null());

        let (_, body) = health_inner(&state(&dir, Some(Arc::new(FixedModel(0, 0.1)))));
        assert_eq!(body["model_backend"], "fixed");
    }

    #[tokio::test]
    async fn test_predict_inner_schema_failure_is_422() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir, Some(Arc::new(FixedModel(1, 0.9))));
        let handle = EnvelopeHandle::begin(Arc::clone(&st.event_log), "POST", "/predict", "unknown");

        let (status, body) =
            predict_inner(st.model.as_deref(), &handle.context(), json!({"CODE_GENDER": "M"})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_array());
        handle.end(status.as_u16());

        // Only the http_request line: no prediction attempted.
        let events = LogReader::new(st.event_log.path()).read_events();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_logs_inner_missing_file_is_empty() {
        let (status, body) = logs_inner(PathBuf::from("/nonexistent/loanrisk/api.log")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_http_analytics_inner_empty_store() {
        let (status, body) = http_analytics_inner(PathBuf::from("/nonexistent/loanrisk/api.log")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);
        assert!(body["error_rate"].is_null());
        assert!(body["p95_latency_ms"].is_null());
    }
}
