//! Append-only cycle log.
//!
//! One record per line: `<RFC3339 UTC> <LEVEL> <message>`. Records are
//! written straight to the file (no user-space buffering) so that partial
//! stage output survives a crash mid-stage. Every record is mirrored to
//! `tracing`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{log_io_err, LogError};
use crate::types::StageName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("INFO"),
            Severity::Warning => f.write_str("WARN"),
            Severity::Error => f.write_str("ERROR"),
        }
    }
}

/// Which pipe of a stage process a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug)]
pub struct CycleLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl CycleLog {
    /// Open (or create) the log in append mode, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-open the file at the same path; used after the file was rotated away.
    pub fn reopen(&self) -> Result<(), LogError> {
        let fresh = open_append(&self.path)?;
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = fresh;
        Ok(())
    }

    pub fn append(&self, severity: Severity, message: &str) -> Result<(), LogError> {
        match severity {
            Severity::Info => tracing::info!("{message}"),
            Severity::Warning => tracing::warn!("{message}"),
            Severity::Error => tracing::error!("{message}"),
        }
        self.write_record(Utc::now(), severity, message)
    }

    pub fn info(&self, message: impl AsRef<str>) -> Result<(), LogError> {
        self.append(Severity::Info, message.as_ref())
    }

    pub fn warn(&self, message: impl AsRef<str>) -> Result<(), LogError> {
        self.append(Severity::Warning, message.as_ref())
    }

    pub fn error(&self, message: impl AsRef<str>) -> Result<(), LogError> {
        self.append(Severity::Error, message.as_ref())
    }

    /// Record one line of live stage output.
    pub fn stage_output(
        &self,
        stage: &StageName,
        stream: OutputStream,
        line: &str,
    ) -> Result<(), LogError> {
        tracing::debug!(stage = %stage, stream = %stream, "{line}");
        self.write_record(
            Utc::now(),
            Severity::Info,
            &format!("[{stage}:{stream}] {line}"),
        )
    }

    fn write_record(
        &self,
        at: DateTime<Utc>,
        severity: Severity,
        message: &str,
    ) -> Result<(), LogError> {
        let record = format_record(at, severity, message);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(record.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| log_io_err(&self.path, e))
    }
}

fn open_append(path: &Path) -> Result<File, LogError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| log_io_err(parent, e))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| log_io_err(path, e))
}

/// Render one record. Embedded newlines are folded so a record stays on one line.
fn format_record(at: DateTime<Utc>, severity: Severity, message: &str) -> String {
    let message = message.trim_end().replace("\r\n", "\n").replace('\n', " | ");
    format!(
        "{} {severity} {message}\n",
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn record_format_is_single_line() {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 6, 0, 0).unwrap();
        let line = format_record(at, Severity::Warning, "fetch failed\nstderr: boom\n");
        assert_eq!(line, "2026-10-16T06:00:00Z WARN fetch failed | stderr: boom\n");
    }

    #[test]
    fn appends_preserve_order_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cycle.log");

        let log = CycleLog::open(&path).unwrap();
        log.info("first").unwrap();
        log.stage_output(&StageName::from("fetch"), OutputStream::Stderr, "partial")
            .unwrap();
        drop(log);

        let log = CycleLog::open(&path).unwrap();
        log.error("third").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("INFO first"));
        assert!(lines[1].ends_with("INFO [fetch:stderr] partial"));
        assert!(lines[2].ends_with("ERROR third"));
    }

    #[test]
    fn reopen_follows_a_rotated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cycle.log");
        let log = CycleLog::open(&path).unwrap();
        log.info("before rotation").unwrap();

        std::fs::rename(&path, dir.path().join("cycle.log.1")).unwrap();
        log.reopen().unwrap();
        log.info("after rotation").unwrap();

        let fresh = std::fs::read_to_string(&path).unwrap();
        assert!(fresh.contains("after rotation"));
        assert!(!fresh.contains("before rotation"));
    }
}
