use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::generation_path;
use crate::error::LoanRiskError;
use crate::events::{parse_time, Event, Level};

/// One parsed line of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: Option<DateTime<Utc>>,
    pub level: Option<Level>,
    pub fields: Map<String, Value>,
}

impl LogRecord {
    /// Parse `<timestamp> - <LEVEL> - <json-object>` or a bare JSON object.
    /// Anything else yields `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let start = line.find('{')?;
        let (header, body) = line.split_at(start);

        let fields = match serde_json::from_str::<Value>(body.trim_end()) {
            Ok(Value::Object(map)) => map,
            _ => return None,
        };

        let mut parts = header.split(" - ").map(str::trim);
        let timestamp = parts.next().and_then(parse_time);
        let level = parts.next().and_then(Level::parse);

        Some(Self {
            timestamp,
            level,
            fields,
        })
    }

    pub fn event_name(&self) -> Option<&str> {
        self.fields.get("event").and_then(Value::as_str)
    }

    /// Typed view of the payload; `None` for unknown or incomplete events.
    pub fn event(&self) -> Option<Event> {
        serde_json::from_value(Value::Object(self.fields.clone())).ok()
    }
}

/// Parse a whole buffer. Lines that are not valid UTF-8 or not JSON objects
/// are skipped.
pub fn parse_records(bytes: &[u8]) -> Vec<LogRecord> {
    bytes
        .split(|b| *b == b'\n')
        .filter_map(|line| std::str::from_utf8(line).ok())
        .filter_map(LogRecord::parse_line)
        .collect()
}

/// Reads the live store and its rotated generations.
#[derive(Debug, Clone)]
pub struct LogReader {
    path: PathBuf,
}

impl LogReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Files to scan, oldest first: every `<path>.N` present in the directory
    /// in descending `N`, then `<path>`. Gaps in the numbering, as seen mid
    /// rotation, do not hide older generations.
    pub fn generations(&self) -> Vec<PathBuf> {
        let mut rotated = self.rotated_indices();
        rotated.sort_unstable_by(|a, b| b.cmp(a));
        let mut paths: Vec<PathBuf> = rotated
            .into_iter()
            .map(|n| generation_path(&self.path, n))
            .collect();
        paths.push(self.path.clone());
        paths
    }

    fn rotated_indices(&self) -> Vec<u32> {
        let Some(name) = self.path.file_name().and_then(|n| n.to_str()) else {
            return Vec::new();
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let prefix = format!("{name}.");
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let file_name = entry.file_name();
                let n: u32 = file_name.to_str()?.strip_prefix(&prefix)?.parse().ok()?;
                (n > 0).then_some(n)
            })
            .collect()
    }

    /// Every record in file order across generations. Missing files, including
    /// ones rotated away between listing and reading, contribute nothing.
    pub fn read_all(&self) -> Vec<LogRecord> {
        let mut records = Vec::new();
        for path in self.generations() {
            match std::fs::read(&path) {
                Ok(bytes) => records.extend(parse_records(&bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "Failed to read event log");
                }
            }
        }
        records
    }

    /// Typed events across generations, skipping unknown payloads.
    pub fn read_events(&self) -> Vec<Event> {
        self.read_all().iter().filter_map(LogRecord::event).collect()
    }

    /// Raw contents of the live file; empty when it does not exist yet.
    pub fn read_raw(&self) -> Result<String, LoanRiskError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}
