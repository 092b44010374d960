//! Line-oriented event store: `<timestamp> - <LEVEL> - <json>` per line,
//! rotated by size into `<path>.1` .. `<path>.N`.

pub mod reader;
pub mod writer;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub use reader::{LogReader, LogRecord};
pub use writer::EventLog;

/// Timestamp layout of the line header (UTC).
pub const HEADER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Path of rotated generation `n` (1 is the most recent).
pub fn generation_path(path: &Path, n: u32) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{n}"));
    PathBuf::from(name)
}
