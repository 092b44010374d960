use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use shellexpand::tilde;

/// Expand `~` and `$VAR`; an unset variable leaves the path tilde-expanded only.
fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| tilde(path).into_owned());
    PathBuf::from(expanded)
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoanRiskConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    /// `linear` (JSON artifact) or `onnx`.
    pub backend: String,
    pub path: String,
    pub onnx_input: String,
    pub onnx_label_output: usize,
    pub onnx_probability_output: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: "linear".to_string(),
            path: "model/model.json".to_string(),
            onnx_input: "float_input".to_string(),
            onnx_label_output: 0,
            onnx_probability_output: 1,
        }
    }
}

impl ModelConfig {
    pub fn resolved_path(&self) -> PathBuf {
        expand_path(&self.path)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EventLogConfig {
    pub path: String,
    /// Rotate once the current file would grow past this many bytes.
    pub max_bytes: u64,
    /// Rotated generations kept next to the live file (`<path>.1` .. `<path>.N`).
    pub backups: u32,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            path: "logs/api_logger.log".to_string(),
            max_bytes: 5 * 1024 * 1024,
            backups: 3,
        }
    }
}

impl EventLogConfig {
    pub fn resolved_path(&self) -> PathBuf {
        expand_path(&self.path)
    }
}

impl LoanRiskConfig {
    /// Load `path` (optional on disk) layered under `LOANRISK__SECTION__KEY`
    /// environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("LOANRISK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = LoanRiskConfig::load("/nonexistent/loanrisk.toml").unwrap();
        assert_eq!(config.http.port, 8000);
        assert_eq!(config.model.backend, "linear");
        assert_eq!(config.event_log.backups, 3);
        assert_eq!(config.event_log.path, "logs/api_logger.log");
    }

    #[test]
    fn test_partial_file_keeps_section_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loanrisk.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[http]\nhost = \"0.0.0.0\"\nport = 9100\n").unwrap();
        writeln!(file, "[event_log]\npath = \"/var/log/loanrisk/events.log\"\n").unwrap();

        let config = LoanRiskConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.http_addr(), "0.0.0.0:9100");
        assert_eq!(config.event_log.path, "/var/log/loanrisk/events.log");
        assert_eq!(config.event_log.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.model.onnx_input, "float_input");
        assert_eq!(config.service.log_level, "info");
    }

    #[test]
    fn test_resolved_path_expands_tilde() {
        let cfg = EventLogConfig {
            path: "~/loanrisk/events.log".to_string(),
            ..EventLogConfig::default()
        };
        let resolved = cfg.resolved_path();
        assert!(!resolved.to_string_lossy().starts_with('~'));
        assert!(resolved.ends_with("loanrisk/events.log"));
    }
}
