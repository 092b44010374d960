//! Derived statistics over the event log.
//!
//! Everything is recomputed from the records on each call. An empty input
//! yields `None` for every statistic rather than zero or NaN.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{Event, PredictionEvent, RequestEvent};
use crate::invoke::PredictionLabel;

/// Error rate at or above which the service is flagged `Elevated`.
pub const ELEVATED_ERROR_RATE: f64 = 0.05;

/// Latencies above `mean + ANOMALY_SIGMAS * σ` are anomalies.
pub const ANOMALY_SIGMAS: f64 = 3.0;

/// Upper bound on histogram bins and on the recent-predictions window.
pub const MAX_BINS: usize = 1000;
pub const MAX_RECENT: usize = 1000;

// ============================================================================
// Prediction distribution
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub request_id: Uuid,
    pub prediction_label: PredictionLabel,
    pub default_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionDistribution {
    pub total: usize,
    pub solvent: usize,
    pub defaulting: usize,
    pub solvent_share: Option<f64>,
    pub defaulting_share: Option<f64>,
    pub probabilities: Vec<f64>,
    #[serde(skip)]
    predictions: Vec<PredictionSummary>,
}

impl PredictionDistribution {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let predictions: Vec<&PredictionEvent> = events
            .into_iter()
            .filter_map(|e| match e {
                Event::Prediction(p) => Some(p),
                _ => None,
            })
            .collect();

        let total = predictions.len();
        let defaulting = predictions
            .iter()
            .filter(|p| p.prediction_label == PredictionLabel::Defaulting)
            .count();
        let solvent = total - defaulting;

        Self {
            total,
            solvent,
            defaulting,
            solvent_share: share(solvent, total),
            defaulting_share: share(defaulting, total),
            probabilities: predictions.iter().map(|p| p.default_probability).collect(),
            predictions: predictions
                .iter()
                .map(|p| PredictionSummary {
                    request_id: p.request_id,
                    prediction_label: p.prediction_label,
                    default_probability: p.default_probability,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Fixed-width histogram of the probabilities over [0, 1]. Empty when
    /// there is no data or `bins` is 0; `bins` is capped at `MAX_BINS`.
    pub fn bucket(&self, bins: usize) -> Vec<Bucket> {
        let bins = bins.min(MAX_BINS);
        if bins == 0 || self.probabilities.is_empty() {
            return Vec::new();
        }
        let width = 1.0 / bins as f64;
        let mut buckets: Vec<Bucket> = (0..bins)
            .map(|i| Bucket {
                lower: i as f64 * width,
                upper: (i + 1) as f64 * width,
                count: 0,
            })
            .collect();
        for p in &self.probabilities {
            let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
            buckets[idx].count += 1;
        }
        buckets
    }

    /// The last `n` predictions, most recent first, at most `MAX_RECENT`.
    pub fn recent(&self, n: usize) -> Vec<PredictionSummary> {
        self.predictions.iter().rev().take(n.min(MAX_RECENT)).cloned().collect()
    }
}

fn share(part: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| part as f64 / total as f64)
}

// ============================================================================
// HTTP operational metrics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthFlag {
    Normal,
    Elevated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathErrorRate {
    pub path: String,
    pub requests: usize,
    pub errors: usize,
    pub error_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    pub request_id: Uuid,
    pub method: String,
    pub path: String,
    pub start_time: DateTime<Utc>,
    pub status_code: u16,
    pub duration_ms: f64,
}

impl From<&RequestEvent> for LatencySample {
    fn from(e: &RequestEvent) -> Self {
        Self {
            request_id: e.request_id,
            method: e.method.clone(),
            path: e.path.clone(),
            start_time: e.start_time,
            status_code: e.status_code,
            duration_ms: e.duration_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpMetrics {
    pub total: usize,
    pub errors: usize,
    pub error_rate: Option<f64>,
    pub health: Option<HealthFlag>,
    pub mean_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    /// Sample standard deviation (n-1); needs at least two requests.
    pub latency_std_ms: Option<f64>,
    pub anomaly_threshold_ms: Option<f64>,
    pub per_path: Vec<PathErrorRate>,
    pub anomalies: Vec<LatencySample>,
    /// `(start_time, duration_ms)` in log order.
    pub latency_series: Vec<(DateTime<Utc>, f64)>,
}

impl HttpMetrics {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let requests: Vec<&RequestEvent> = events
            .into_iter()
            .filter_map(|e| match e {
                Event::HttpRequest(r) => Some(r),
                _ => None,
            })
            .collect();

        let total = requests.len();
        let errors = requests.iter().filter(|r| r.is_error()).count();
        let error_rate = share(errors, total);
        let health = error_rate.map(|rate| {
            if rate < ELEVATED_ERROR_RATE {
                HealthFlag::Normal
            } else {
                HealthFlag::Elevated
            }
        });

        let latencies: Vec<f64> = requests.iter().map(|r| r.duration_ms()).collect();
        let mean_latency_ms = mean(&latencies);
        let latency_std_ms = sample_std(&latencies);
        let anomaly_threshold_ms = match (mean_latency_ms, latency_std_ms) {
            (Some(m), Some(s)) => Some(m + ANOMALY_SIGMAS * s),
            _ => None,
        };
        let anomalies = match anomaly_threshold_ms {
            Some(threshold) => requests
                .iter()
                .filter(|r| r.duration_ms() > threshold)
                .map(|r| LatencySample::from(*r))
                .collect(),
            None => Vec::new(),
        };

        let mut by_path: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for r in &requests {
            let entry = by_path.entry(r.path.as_str()).or_default();
            entry.0 += 1;
            if r.is_error() {
                entry.1 += 1;
            }
        }
        let per_path = by_path
            .into_iter()
            .map(|(path, (requests, errors))| PathErrorRate {
                path: path.to_string(),
                requests,
                errors,
                error_rate: errors as f64 / requests as f64,
            })
            .collect();

        Self {
            total,
            errors,
            error_rate,
            health,
            mean_latency_ms,
            p95_latency_ms: percentile(&latencies, 0.95),
            latency_std_ms,
            anomaly_threshold_ms,
            per_path,
            anomalies,
            latency_series: requests
                .iter()
                .map(|r| (r.start_time, r.duration_ms()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

// ============================================================================
// Statistics helpers
// ============================================================================

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Standard deviation with the n-1 denominator.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Linear interpolation between closest ranks, rank = p * (n - 1).
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

// ============================================================================
// TESTS
// ============================================================================
