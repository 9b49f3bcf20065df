//! Durable state files next to the cycle log.
//!
//! - `last_success.json`: the success marker, overwritten only after a
//!   fully successful cycle whose publication did not fail.
//! - `last_cycle.json`: summary of the most recent cycle attempt.
//!
//! Both use the `.tmp` + rename pattern so readers never see a torn file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{log_io_err, LogError};
use crate::types::{CycleResult, PublishResult};

/// On-disk success marker payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessRecord {
    pub last_success_at: DateTime<Utc>,
    pub cycle_started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SuccessMarker {
    path: PathBuf,
}

impl SuccessMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the marker.
    pub fn record(
        &self,
        at: DateTime<Utc>,
        cycle_started_at: DateTime<Utc>,
    ) -> Result<(), LogError> {
        write_json_atomic(
            &self.path,
            &SuccessRecord {
                last_success_at: at,
                cycle_started_at,
            },
        )
    }

    /// Returns `None` if no cycle has ever succeeded.
    pub fn load(&self) -> Result<Option<SuccessRecord>, LogError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| log_io_err(&self.path, e))?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| LogError::Json {
                path: self.path.clone(),
                source,
            })
    }
}

/// Summary of one cycle attempt, for external tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    /// 0 for the scheduled run, n for the n-th backoff re-run.
    pub attempt: u32,
    pub cycle: CycleResult,
    /// `None` when publication was not attempted for this attempt.
    pub publish: Option<PublishResult>,
    pub marker_updated: bool,
}

pub fn write_summary(path: &Path, summary: &CycleSummary) -> Result<(), LogError> {
    write_json_atomic(path, summary)
}

/// Serialize to `<path>.tmp`, then rename over `<path>`.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), LogError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(|e| log_io_err(dir, e))?;
        }
    }

    let json = serde_json::to_string_pretty(value).map_err(|source| LogError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| log_io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| log_io_err(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Stage, StageExit, StageOutcome, StagePolicy};
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn missing_marker_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let marker = SuccessMarker::new(tmp.path().join("last_success.json"));
        assert_eq!(marker.load().unwrap(), None);
    }

    #[test]
    fn marker_is_overwritten_not_appended() {
        let tmp = TempDir::new().unwrap();
        let marker = SuccessMarker::new(tmp.path().join("Output").join("last_success.json"));
        let first = Utc::now() - Duration::days(1);
        let second = Utc::now();

        marker.record(first, first).unwrap();
        marker.record(second, second).unwrap();

        let loaded = marker.load().unwrap().expect("marker present");
        assert_eq!(loaded.last_success_at, second);
        let tmp_path = marker.path().with_extension("json.tmp");
        assert!(!tmp_path.exists(), "tmp file should be renamed away");
    }

    #[test]
    fn summary_is_valid_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("last_cycle.json");
        let now = Utc::now();
        let summary = CycleSummary {
            attempt: 0,
            cycle: CycleResult::from_outcomes(
                now,
                now,
                vec![StageOutcome {
                    stage: Stage::new("settle", ["python3", "settle_results.py"], StagePolicy::Skip),
                    exit: StageExit::Failed { code: Some(1) },
                    aborted: false,
                    duration_ms: 12,
                }],
            ),
            publish: Some(PublishResult::Skipped {
                reason: "no credential".to_string(),
            }),
            marker_updated: false,
        };

        write_summary(&path, &summary).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["cycle"]["overall"], "partial_failure");
        assert_eq!(value["cycle"]["outcomes"][0]["exit"]["status"], "failed");
        assert_eq!(value["publish"]["result"], "skipped");
    }
}
