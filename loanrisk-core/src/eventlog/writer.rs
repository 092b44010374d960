use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{generation_path, HEADER_TIME_FORMAT};
use crate::config::EventLogConfig;
use crate::error::LoanRiskError;
use crate::events::Event;

/// Append-only writer for the event store.
///
/// Emission is fire-and-forget: failures go to `tracing::warn!` and never
/// reach the caller. A batch is serialized up front and appended with a single
/// `write_all` while the lock is held, so lines from concurrent requests never
/// interleave and a batch is never split across a rotation.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    max_bytes: u64,
    backups: u32,
    current: Mutex<Option<OpenLog>>,
}

#[derive(Debug)]
struct OpenLog {
    file: File,
    size: u64,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, backups: u32) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            backups,
            current: Mutex::new(None),
        }
    }

    pub fn from_config(config: &EventLogConfig) -> Self {
        Self::new(config.resolved_path(), config.max_bytes, config.backups)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backups(&self) -> u32 {
        self.backups
    }

    pub fn emit(&self, event: &Event) {
        self.emit_batch(std::slice::from_ref(event));
    }

    pub fn emit_batch(&self, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        let buf = match format_batch(events, Utc::now()) {
            Ok(buf) => buf,
            Err(e) => {
                tracing::warn!(error = %e, count = events.len(), "Failed to serialize event batch");
                return;
            }
        };
        if let Err(e) = self.append(buf.as_bytes()) {
            tracing::warn!(
                error = %e,
                path = %self.path.display(),
                count = events.len(),
                "Failed to append to event log"
            );
        }
    }

    fn append(&self, buf: &[u8]) -> Result<(), LoanRiskError> {
        let mut guard = self
            .current
            .lock()
            .map_err(|e| LoanRiskError::Other(format!("event log lock poisoned: {e}")))?;

        if let Some(open) = guard.as_ref() {
            if open.size > 0 && open.size + buf.len() as u64 > self.max_bytes {
                *guard = None;
                self.rotate()?;
            }
        }

        if guard.is_none() {
            let opened = self.open()?;
            // A fresh handle may land on a file that is already full.
            if opened.size > 0 && opened.size + buf.len() as u64 > self.max_bytes {
                drop(opened);
                self.rotate()?;
                *guard = Some(self.open()?);
            } else {
                *guard = Some(opened);
            }
        }

        let Some(open) = guard.as_mut() else {
            return Err(LoanRiskError::Other("event log not open".to_string()));
        };
        let written = open.file.write_all(buf).and_then(|_| open.file.flush());
        match written {
            Ok(()) => {
                open.size += buf.len() as u64;
                Ok(())
            }
            Err(e) => {
                // Reopen on the next append.
                *guard = None;
                Err(e.into())
            }
        }
    }

    fn open(&self) -> Result<OpenLog, LoanRiskError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let size = file.metadata()?.len();
        Ok(OpenLog { file, size })
    }

    /// Shift `<path>.i` to `<path>.i+1`, dropping the oldest, then move the
    /// live file to `<path>.1`. With no backups the live file is truncated.
    fn rotate(&self) -> Result<(), LoanRiskError> {
        if self.backups == 0 {
            OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            return Ok(());
        }

        let oldest = generation_path(&self.path, self.backups);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }
        for n in (1..self.backups).rev() {
            let from = generation_path(&self.path, n);
            if from.exists() {
                std::fs::rename(&from, generation_path(&self.path, n + 1))?;
            }
        }
        if self.path.exists() {
            std::fs::rename(&self.path, generation_path(&self.path, 1))?;
        }
        tracing::info!(path = %self.path.display(), backups = self.backups, "Rotated event log");
        Ok(())
    }
}

/// One line: `<timestamp> - <LEVEL> - <json>\n`.
pub fn format_line(event: &Event, at: DateTime<Utc>) -> Result<String, LoanRiskError> {
    let json = serde_json::to_string(event)?;
    if json.contains(['\n', '\r']) {
        return Err(LoanRiskError::Other(
            "serialized event contains a raw line break".to_string(),
        ));
    }
    Ok(format!(
        "{} - {} - {}\n",
        at.format(HEADER_TIME_FORMAT),
        event.level().as_str(),
        json
    ))
}

fn format_batch(events: &[Event], at: DateTime<Utc>) -> Result<String, LoanRiskError> {
    let mut buf = String::new();
    for event in events {
        buf.push_str(&format_line(event, at)?);
    }
    Ok(buf)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::LogReader;
    use crate::events::RequestEvent;
    use chrono::TimeZone;
    use std::sync::Arc;
    use uuid::Uuid;

    fn request(path: &str, status_code: u16) -> Event {
        Event::HttpRequest(RequestEvent {
            request_id: Uuid::new_v4(),
            method: "GET".to_string(),
            path: path.to_string(),
            start_time: Utc::now(),
            status_code,
            duration: 0.01,
            client_address: "127.0.0.1".to_string(),
        })
    }

    #[test]
    fn test_format_line_header() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 30).unwrap();
        let line = format_line(&request("/", 200), at).unwrap();
        assert!(line.starts_with("2024-05-01 10:15:30,000 - INFO - {"), "line: {line}");
        assert!(line.ends_with("}\n"));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_emit_appends_in_call_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("logs/api.log"), 1024 * 1024, 3);

        log.emit(&request("/a", 200));
        log.emit_batch(&[request("/b", 404), request("/c", 500)]);

        let records = LogReader::new(log.path()).read_all();
        let paths: Vec<String> = records
            .iter()
            .map(|r| r.fields["path"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(paths, vec!["/a", "/b", "/c"]);
        assert_eq!(records[1].level, Some(crate::events::Level::Warning));
        assert_eq!(records[2].level, Some(crate::events::Level::Error));
    }

    #[test]
    fn test_rotation_keeps_bounded_generations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.log");
        let line_len = format_line(&request("/rotate", 200), Utc::now()).unwrap().len() as u64;
        // Room for two lines per file.
        let log = EventLog::new(&path, line_len * 2 + 20, 2);

        for _ in 0..9 {
            log.emit(&request("/rotate", 200));
        }

        assert!(path.exists());
        assert!(generation_path(&path, 1).exists());
        assert!(generation_path(&path, 2).exists());
        assert!(!generation_path(&path, 3).exists());

        let records = LogReader::new(&path).read_all();
        assert!(records.len() <= 6, "got {} records", records.len());
        assert!(records.len() >= 5, "got {} records", records.len());
    }

    #[test]
    fn test_batch_never_split_across_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.log");
        let line_len = format_line(&request("/x", 200), Utc::now()).unwrap().len() as u64;
        let log = EventLog::new(&path, line_len * 2 + 20, 1);

        log.emit(&request("/x", 200));
        log.emit_batch(&[request("/x", 500), request("/x", 500)]);

        let live = std::fs::read_to_string(&path).unwrap();
        assert_eq!(live.lines().count(), 2);
        let rotated = std::fs::read_to_string(generation_path(&path, 1)).unwrap();
        assert_eq!(rotated.lines().count(), 1);
    }

    #[test]
    fn test_unwritable_path_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let log = EventLog::new(blocker.join("api.log"), 1024, 1);
        log.emit(&request("/", 200));
        assert!(!blocker.join("api.log").exists());
    }

    #[test]
    fn test_concurrent_batches_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(EventLog::new(dir.path().join("api.log"), 64 * 1024 * 1024, 1));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        let path = format!("/worker/{i}");
                        log.emit_batch(&[request(&path, 200), request(&path, 201)]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let records = LogReader::new(log.path()).read_all();
        assert_eq!(records.len(), 8 * 25 * 2);
        for pair in records.chunks(2) {
            assert_eq!(pair[0].fields["path"], pair[1].fields["path"]);
            assert_eq!(pair[0].fields["status_code"], 200);
            assert_eq!(pair[1].fields["status_code"], 201);
        }
    }
}
