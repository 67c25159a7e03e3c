//! Append-only request log (`requests.log`).
//!
//! One line per request:
//!
//! ```text
//! 2024-05-01T12:00:00.000Z HIT src/main.cpp tool=cl command=0123456789abcdef entry=entry_000003
//! ```
//!
//! Only identifying information is written; never tool output or file bytes.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::fingerprint::CommandFingerprint;
use crate::index::EntryId;

/// Name of the log file within the cache directory.
pub const REQUEST_LOG_FILE: &str = "requests.log";

/// Outcome of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Replayed from an entry.
    Hit,
    /// Ran the tool (and recorded it if it succeeded).
    Miss,
    /// Ran the tool without consulting or updating the cache.
    Uncacheable,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Hit => "HIT",
            Outcome::Miss => "MISS",
            Outcome::Uncacheable => "UNCACHEABLE",
        })
    }
}

/// Writer for `requests.log`.
#[derive(Debug, Clone)]
pub struct RequestLog {
    path: PathBuf,
}

impl RequestLog {
    /// Creates a log writer for the given cache directory.
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join(REQUEST_LOG_FILE),
        }
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line. Failures are logged and otherwise ignored.
    pub fn record(
        &self,
        outcome: Outcome,
        subject: &str,
        command: &CommandFingerprint,
        entry: Option<EntryId>,
    ) {
        let entry = entry.map_or_else(|| "-".to_string(), |id| id.to_string());
        let digest = command.digest();
        tracing::info!(%outcome, subject, tool = %command.tool, %entry, "request");

        let line = format!(
            "{} {outcome} {subject} tool={} command={digest} entry={entry}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            command.tool,
        );
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(log = %self.path.display(), error = %e, "failed to append request log");
        }
    }
}
