//! loanrisk-cli: scoring client and terminal dashboard for LoanRisk
//!
//! # Subcommands
//! - `status`                                   - API reachability (`/` and `/health`)
//! - `predict --input <file.json>`              - score one application
//! - `predictions [--log-file <path>] [--bins N]` - prediction distribution
//! - `metrics [--log-file <path>]`              - latency, error rate, anomalies
//!
//! With `--log-file` the dashboards read the event log directly instead of
//! querying the analytics endpoints.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use loanrisk_core::analytics::{Bucket, PredictionSummary};
use loanrisk_core::{HealthFlag, HttpMetrics, LogReader, PredictionDistribution};
use serde::{Deserialize, Serialize};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
const DEFAULT_BINS: usize = 10;
const RECENT_PREDICTIONS: usize = 10;
const DECISION_THRESHOLD: f64 = 0.5;
const BAR_WIDTH: usize = 40;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "loanrisk-cli", version, about = "LoanRisk scoring client and dashboard")]
struct Cli {
    /// LoanRisk HTTP server URL (overrides LOANRISK_HTTP_URL env var)
    #[arg(long, env = "LOANRISK_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check that the API is reachable and the model is loaded
    Status,

    /// Submit one application (JSON file) and print the verdict
    Predict {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Prediction distribution: totals, shares, histogram, latest predictions
    Predictions {
        /// Read this event log instead of querying the server
        #[arg(long)]
        log_file: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_BINS)]
        bins: usize,
    },

    /// HTTP metrics: error rate, latency, per-path errors, anomalies
    Metrics {
        /// Read this event log instead of querying the server
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
}

// ============================================================================
// Report Types
// ============================================================================

/// Body of `GET /analytics/predictions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionReport {
    #[serde(flatten)]
    pub distribution: PredictionDistribution,
    pub histogram: Vec<Bucket>,
    pub recent: Vec<PredictionSummary>,
}

impl PredictionReport {
    pub fn from_distribution(distribution: PredictionDistribution, bins: usize) -> Self {
        Self {
            histogram: distribution.bucket(bins),
            recent: distribution.recent(RECENT_PREDICTIONS),
            distribution,
        }
    }
}

fn local_prediction_report(log_file: &Path, bins: usize) -> PredictionReport {
    let events = LogReader::new(log_file).read_events();
    PredictionReport::from_distribution(PredictionDistribution::from_events(&events), bins)
}

fn local_http_metrics(log_file: &Path) -> HttpMetrics {
    let events = LogReader::new(log_file).read_events();
    HttpMetrics::from_events(&events)
}

// ============================================================================
// Rendering
// ============================================================================

fn fmt_pct(v: Option<f64>) -> String {
    v.map(|x| format!("{:.1}%", x * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}

fn fmt_ms(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.1} ms"))
        .unwrap_or_else(|| "n/a".to_string())
}

pub fn render_prediction_report(report: &PredictionReport) -> String {
    let d = &report.distribution;
    let mut out = String::new();
    if d.total == 0 {
        out.push_str("No predictions logged yet.\n");
        return out;
    }

    let _ = writeln!(out, "Predictions:  {}", d.total);
    let _ = writeln!(out, "Solvable:     {} ({})", d.solvent, fmt_pct(d.solvent_share));
    let _ = writeln!(out, "Défaillant:   {} ({})", d.defaulting, fmt_pct(d.defaulting_share));

    if !report.histogram.is_empty() {
        let _ = writeln!(out, "\nDefault probability");
        let max = report.histogram.iter().map(|b| b.count).max().unwrap_or(0).max(1);
        for bucket in &report.histogram {
            let len = bucket.count * BAR_WIDTH / max;
            let marker = if bucket.lower <= DECISION_THRESHOLD && DECISION_THRESHOLD < bucket.upper {
                "  <- threshold 0.5"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "  [{:.2}, {:.2}) {:>5} {}{}",
                bucket.lower,
                bucket.upper,
                bucket.count,
                "#".repeat(len),
                marker
            );
        }
    }

    if !report.recent.is_empty() {
        let _ = writeln!(out, "\nLatest predictions");
        for p in &report.recent {
            let _ = writeln!(
                out,
                "  {}  {:<10}  {:.4}",
                p.request_id,
                p.prediction_label.wire_name(),
                p.default_probability
            );
        }
    }
    out
}

pub fn render_http_metrics(m: &HttpMetrics) -> String {
    let mut out = String::new();
    if m.total == 0 {
        out.push_str("No HTTP requests logged yet.\n");
        return out;
    }

    let health = match m.health {
        Some(HealthFlag::Normal) => "Normal",
        Some(HealthFlag::Elevated) => "Elevated",
        None => "n/a",
    };
    let _ = writeln!(out, "Requests:     {}", m.total);
    let _ = writeln!(out, "Error rate:   {} [{}]", fmt_pct(m.error_rate), health);
    let _ = writeln!(out, "Mean latency: {}", fmt_ms(m.mean_latency_ms));
    let _ = writeln!(out, "P95 latency:  {}", fmt_ms(m.p95_latency_ms));

    let _ = writeln!(out, "\nErrors by path");
    for p in &m.per_path {
        let _ = writeln!(
            out,
            "  {:<28} {:>6} req  {:>6.1}%",
            p.path,
            p.requests,
            p.error_rate * 100.0
        );
    }

    let _ = writeln!(
        out,
        "\nLatency anomalies (> {})",
        fmt_ms(m.anomaly_threshold_ms)
    );
    if m.anomalies.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for a in &m.anomalies {
        let _ = writeln!(
            out,
            "  {}  {} {}  {}  {:.1} ms",
            a.start_time.format("%Y-%m-%d %H:%M:%S"),
            a.method,
            a.path,
            a.status_code,
            a.duration_ms
        );
    }
    out
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

fn fetch_json<T: for<'de> Deserialize<'de>>(url: &str) -> anyhow::Result<T> {
    let resp = match client(30)?.get(url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("loanrisk-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("loanrisk-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }
    Ok(resp.json()?)
}

/// Check `GET /` and `GET /health`.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = client(10)?;

    let url = format!("{}/", server);
    match client.get(&url).send() {
        Ok(r) if r.status().is_success() => println!("API:          reachable ({})", server),
        Ok(r) => {
            eprintln!("loanrisk-cli: API answered HTTP {}", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("loanrisk-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    let url = format!("{}/health", server);
    match client.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            let loaded = body["model_loaded"].as_bool().unwrap_or(false);
            println!("Status:       {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
            println!(
                "Model:        {}",
                if loaded {
                    body["model_backend"].as_str().unwrap_or("loaded").to_string()
                } else {
                    "not loaded".to_string()
                }
            );
            println!("Event log:    {}", body["event_log"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            eprintln!("loanrisk-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("loanrisk-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Submit one application read from `input`.
fn do_predict(server: &str, input: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(input)?;
    let record: serde_json::Value = serde_json::from_str(&raw)?;

    let url = format!("{}/predict", server);
    let resp = match client(30)?.post(&url).json(&record).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("loanrisk-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        eprintln!("loanrisk-cli: prediction rejected (HTTP {})", status);
        match &body["detail"] {
            serde_json::Value::Array(errors) => {
                for e in errors {
                    let field = e["loc"]
                        .as_array()
                        .and_then(|loc| loc.last())
                        .and_then(|f| f.as_str())
                        .unwrap_or("body");
                    eprintln!("  {}: {}", field, e["msg"].as_str().unwrap_or("invalid"));
                }
            }
            other => eprintln!("  {}", other.as_str().unwrap_or("unknown error")),
        }
        std::process::exit(1);
    }

    println!("Prediction:           {}", body["prediction"].as_str().unwrap_or("?"));
    match body["probabilité_defaut"].as_f64() {
        Some(p) => println!("Default probability:  {:.4}", p),
        None => println!("Default probability:  ?"),
    }
    Ok(())
}

fn do_predictions(server: &str, log_file: Option<&Path>, bins: usize) -> anyhow::Result<()> {
    let report = match log_file {
        Some(path) => local_prediction_report(path, bins),
        None => fetch_json(&format!(
            "{}/analytics/predictions?bins={}&recent={}",
            server, bins, RECENT_PREDICTIONS
        ))?,
    };
    print!("{}", render_prediction_report(&report));
    Ok(())
}

fn do_metrics(server: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    let metrics = match log_file {
        Some(path) => local_http_metrics(path),
        None => fetch_json(&format!("{}/analytics/http", server))?,
    };
    print!("{}", render_http_metrics(&metrics));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Status => do_status(&server),
        Commands::Predict { input } => do_predict(&server, &input),
        Commands::Predictions { log_file, bins } => {
            do_predictions(&server, log_file.as_deref(), bins)
        }
        Commands::Metrics { log_file } => do_metrics(&server, log_file.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("loanrisk-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loanrisk_core::{Event, EventLog, PredictionEvent, PredictionLabel, RequestEvent};
    use uuid::Uuid;

    fn write_log(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("api_logger.log");
        let log = EventLog::new(&path, 1024 * 1024, 1);
        for (label, p, status, ms) in [
            (PredictionLabel::Solvent, 0.12, 200, 10.0),
            (PredictionLabel::Defaulting, 0.81, 200, 12.0),
            (PredictionLabel::Solvent, 0.33, 500, 11.0),
        ] {
            let id = Uuid::new_v4();
            log.emit_batch(&[
                Event::Prediction(PredictionEvent {
                    request_id: id,
                    input_record: serde_json::json!({}),
                    prediction_label: label,
                    default_probability: p,
                }),
                Event::HttpRequest(RequestEvent {
                    request_id: id,
                    method: "POST".to_string(),
                    path: "/predict".to_string(),
                    start_time: Utc::now(),
                    status_code: status,
                    duration: ms / 1000.0,
                    client_address: "127.0.0.1".to_string(),
                }),
            ]);
        }
        path
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["loanrisk-cli", "predictions", "--bins", "5"]).unwrap();
        match cli.command {
            Commands::Predictions { log_file, bins } => {
                assert!(log_file.is_none());
                assert_eq!(bins, 5);
            }
            other => panic!("Expected predictions, got {other:?}"),
        }
        assert!(Cli::try_parse_from(["loanrisk-cli", "predict"]).is_err());
    }

    #[test]
    fn test_local_prediction_report_renders() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir);
        let report = local_prediction_report(&path, 10);
        assert_eq!(report.distribution.total, 3);
        assert_eq!(report.recent.len(), 3);

        let text = render_prediction_report(&report);
        assert!(text.contains("Predictions:  3"), "{text}");
        assert!(text.contains("Défaillant:   1 (33.3%)"), "{text}");
        assert!(text.contains("<- threshold 0.5"), "{text}");
    }

    #[test]
    fn test_local_http_metrics_renders() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir);
        let metrics = local_http_metrics(&path);
        assert_eq!(metrics.total, 3);

        let text = render_http_metrics(&metrics);
        assert!(text.contains("Requests:     3"), "{text}");
        assert!(text.contains("[Elevated]"), "{text}");
        assert!(text.contains("/predict"), "{text}");
        assert!(text.contains("none"), "{text}");
    }

    #[test]
    fn test_empty_log_renders_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.log");
        let text = render_prediction_report(&local_prediction_report(&path, 10));
        assert_eq!(text, "No predictions logged yet.\n");
        let text = render_http_metrics(&local_http_metrics(&path));
        assert_eq!(text, "No HTTP requests logged yet.\n");
    }

    #[test]
    fn test_report_round_trips_through_server_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir);
        let report = local_prediction_report(&path, 4);
        let wire = serde_json::to_value(&report).unwrap();
        assert_eq!(wire["total"], 3);
        assert_eq!(wire["histogram"].as_array().unwrap().len(), 4);

        let parsed: PredictionReport = serde_json::from_value(wire).unwrap();
        assert_eq!(parsed.distribution.defaulting, 1);
        assert_eq!(parsed.recent.len(), 3);
    }
}
