//! Size-based rotation of the cycle log.
//!
//! `cycle.log` is rotated once it reaches the configured size, keeping at
//! most 5 rotated copies:
//!   cycle.log → cycle.log.1 → cycle.log.2 → … → cycle.log.5

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lockbox_core::CycleLog;

/// Default rotation threshold (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated backup files to keep.
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` if its size exceeds `max_bytes`.
///
/// Rotation sequence (oldest first):
///   `<name>.<max_files>` deleted  
///   `<name>.<n>` → `<name>.<n+1>` for n = max_files-1 … 1  
///   `<name>` → `<name>.1`  
///   Create fresh empty `<name>`.
///
/// Returns `true` if rotation occurred, `false` if the file was under the
/// threshold, did not exist yet, or `max_bytes` is 0 (rotation disabled).
pub fn rotate_if_needed(
    log_path: &Path,
    max_bytes: u64,
    max_files: usize,
) -> io::Result<bool> {
    if max_bytes == 0 {
        return Ok(false);
    }

    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    if size < max_bytes {
        return Ok(false);
    }

    // Remove the oldest file so we don't exceed max_files.
    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    // Shift existing rotated files up by one.
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        let dst = numbered_path(log_path, n + 1);
        if src.exists() {
            fs::rename(&src, &dst)?;
        }
    }

    // Rename live log → .1
    fs::rename(log_path, numbered_path(log_path, 1))?;

    fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(log_path)?;

    Ok(true)
}

/// Rotate the cycle log if it has grown past `max_bytes`, then point the
/// log's handle at the fresh file.
///
/// Rotation failures are logged as warnings; the current file keeps
/// receiving records. Only a failure to reopen the log is an error.
pub fn rotate_cycle_log(log: &CycleLog, max_bytes: u64) -> Result<bool, lockbox_core::LogError> {
    match rotate_if_needed(log.path(), max_bytes, MAX_ROTATED_FILES) {
        Ok(true) => {
            log.reopen()?;
            tracing::info!(path = %log.path().display(), "cycle log rotated");
            Ok(true)
        }
        Ok(false) => Ok(false),
        Err(err) => {
            tracing::warn!(path = %log.path().display(), error = %err, "cycle log rotation failed");
            Ok(false)
        }
    }
}

/// Path of the `n`-th rotated copy of `base` (e.g. `cycle.log.2`).
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(crate::paths::CYCLE_LOG);
    base.with_file_name(format!("{name}.{n}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SMALL: u64 = 64;

    fn fill(path: &Path, bytes: usize) {
        fs::write(path, vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn small_log_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("cycle.log");
        fill(&log, 10);

        assert!(!rotate_if_needed(&log, SMALL, MAX_ROTATED_FILES).unwrap());
        assert!(!numbered_path(&log, 1).exists());
    }

    #[test]
    fn oversized_log_moves_to_first_copy() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("cycle.log");
        fill(&log, SMALL as usize);

        assert!(rotate_if_needed(&log, SMALL, MAX_ROTATED_FILES).unwrap());
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        assert_eq!(fs::metadata(numbered_path(&log, 1)).unwrap().len(), SMALL);
    }

    #[test]
    fn zero_threshold_disables_rotation() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("cycle.log");
        fill(&log, 4096);

        assert!(!rotate_if_needed(&log, 0, MAX_ROTATED_FILES).unwrap());
        assert_eq!(fs::metadata(&log).unwrap().len(), 4096);
    }

    #[test]
    fn missing_log_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(!rotate_if_needed(&dir.path().join("cycle.log"), SMALL, MAX_ROTATED_FILES).unwrap());
    }

    #[test]
    fn rotated_copies_are_capped_and_shifted() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("cycle.log");

        for round in 0..(MAX_ROTATED_FILES + 2) {
            fs::write(&log, format!("round-{round}").repeat(16)).unwrap();
            assert!(rotate_if_needed(&log, SMALL, MAX_ROTATED_FILES).unwrap());
        }

        let newest = fs::read_to_string(numbered_path(&log, 1)).unwrap();
        assert!(newest.starts_with(&format!("round-{}", MAX_ROTATED_FILES + 1)));
        assert!(numbered_path(&log, MAX_ROTATED_FILES).exists());
        assert!(!numbered_path(&log, MAX_ROTATED_FILES + 1).exists());
    }

    #[test]
    fn cycle_log_keeps_writing_after_rotation() {
        let dir = TempDir::new().unwrap();
        let log = CycleLog::open(dir.path().join("cycle.log")).unwrap();
        for n in 0..4 {
            log.info(format!("filler record {n}")).unwrap();
        }

        assert!(rotate_cycle_log(&log, SMALL).unwrap());
        log.info("after rotation").unwrap();

        let live = fs::read_to_string(log.path()).unwrap();
        let rotated = fs::read_to_string(numbered_path(log.path(), 1)).unwrap();
        assert!(live.contains("after rotation"));
        assert!(!live.contains("filler record"));
        assert!(rotated.contains("filler record 3"));
    }
}
