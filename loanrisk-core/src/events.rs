//! Event records persisted to the event log. Every record is a JSON object
//! tagged by its `event` field.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::invoke::{PredictionErrorKind, PredictionLabel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    HttpRequest(RequestEvent),
    Prediction(PredictionEvent),
    PredictionError(PredictionErrorEvent),
}

impl Event {
    pub fn request_id(&self) -> Uuid {
        match self {
            Event::HttpRequest(e) => e.request_id,
            Event::Prediction(e) => e.request_id,
            Event::PredictionError(e) => e.request_id,
        }
    }

    /// Severity of the log line carrying this event.
    pub fn level(&self) -> Level {
        match self {
            Event::HttpRequest(e) if e.status_code >= 500 => Level::Error,
            Event::HttpRequest(e) if e.status_code >= 400 => Level::Warning,
            Event::HttpRequest(_) | Event::Prediction(_) => Level::Info,
            Event::PredictionError(_) => Level::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(Level::Info),
            "WARNING" => Some(Level::Warning),
            "ERROR" => Some(Level::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub request_id: Uuid,
    pub method: String,
    pub path: String,
    #[serde(alias = "timestamp", deserialize_with = "deserialize_time")]
    pub start_time: DateTime<Utc>,
    pub status_code: u16,
    /// Seconds.
    pub duration: f64,
    #[serde(default = "unknown_client")]
    pub client_address: String,
}

impl RequestEvent {
    pub fn duration_ms(&self) -> f64 {
        self.duration * 1000.0
    }

    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEvent {
    pub request_id: Uuid,
    #[serde(alias = "input_data")]
    pub input_record: Value,
    #[serde(alias = "prediction")]
    pub prediction_label: PredictionLabel,
    #[serde(alias = "probabilité_defaut")]
    pub default_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionErrorEvent {
    pub request_id: Uuid,
    pub error_message: String,
    #[serde(default)]
    pub stack_trace: String,
    #[serde(default = "default_error_kind")]
    pub kind: PredictionErrorKind,
}

fn unknown_client() -> String {
    "unknown".to_string()
}

fn default_error_kind() -> PredictionErrorKind {
    PredictionErrorKind::PredictionFailure
}

/// RFC 3339, or a naive ISO-8601 timestamp taken as UTC.
fn deserialize_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_time(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`")))
}

pub(crate) fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S,%3f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_event_serializes_with_tag() {
        let id = Uuid::new_v4();
        let event = Event::HttpRequest(RequestEvent {
            request_id: id,
            method: "POST".to_string(),
            path: "/predict".to_string(),
            start_time: Utc::now(),
            status_code: 200,
            duration: 0.012,
            client_address: "127.0.0.1".to_string(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "http_request");
        assert_eq!(value["request_id"], id.to_string());
        assert_eq!(value["status_code"], 200);
        assert_eq!(event.level(), Level::Info);
    }

    #[test]
    fn test_legacy_keys_accepted() {
        let raw = json!({
            "event": "prediction",
            "request_id": "8c5e4a3e-58a0-4c1f-9d8e-2f5b0a1c7d11",
            "input_data": {"CODE_GENDER": "F"},
            "prediction": "Défaillant",
            "probabilité_defaut": 0.81
        });
        let event: Event = serde_json::from_value(raw).unwrap();
        match event {
            Event::Prediction(p) => {
                assert_eq!(p.prediction_label, PredictionLabel::Defaulting);
                assert_eq!(p.default_probability, 0.81);
                assert_eq!(p.input_record["CODE_GENDER"], "F");
            }
            other => panic!("Expected prediction event, got {other:?}"),
        }
    }

    #[test]
    fn test_legacy_naive_timestamp_accepted() {
        let raw = json!({
            "event": "http_request",
            "request_id": "8c5e4a3e-58a0-4c1f-9d8e-2f5b0a1c7d11",
            "method": "GET",
            "path": "/",
            "timestamp": "2024-05-01T10:15:30.250000",
            "status_code": 404,
            "duration": 0.5
        });
        let event: Event = serde_json::from_value(raw).unwrap();
        let Event::HttpRequest(req) = event.clone() else {
            panic!("Expected http_request event");
        };
        assert_eq!(req.client_address, "unknown");
        assert_eq!(req.duration_ms(), 500.0);
        assert_eq!(req.start_time.to_rfc3339(), "2024-05-01T10:15:30.250+00:00");
        assert_eq!(event.level(), Level::Warning);
    }

    #[test]
    fn test_prediction_error_defaults_kind() {
        let raw = json!({
            "event": "prediction_error",
            "request_id": "8c5e4a3e-58a0-4c1f-9d8e-2f5b0a1c7d11",
            "error_message": "boom"
        });
        let event: Event = serde_json::from_value(raw).unwrap();
        match event {
            Event::PredictionError(e) => assert_eq!(e.kind, PredictionErrorKind::PredictionFailure),
            other => panic!("Expected prediction_error event, got {other:?}"),
        }
    }

    #[test]
    fn test_stack_trace_has_no_raw_newline_on_the_wire() {
        let event = Event::PredictionError(PredictionErrorEvent {
            request_id: Uuid::new_v4(),
            error_message: "boom".to_string(),
            stack_trace: "outer\n\nCaused by:\n    inner".to_string(),
            kind: PredictionErrorKind::PredictionFailure,
        });
        let line = serde_json::to_string(&event).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(event.level(), Level::Error);
    }
}
