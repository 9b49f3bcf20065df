use std::path::{Path, PathBuf};

pub const CYCLE_LOG: &str = "cycle.log";
pub const SUCCESS_MARKER: &str = "last_success.json";
pub const CYCLE_SUMMARY: &str = "last_cycle.json";

pub fn cycle_log_path(output_dir: &Path) -> PathBuf {
    output_dir.join(CYCLE_LOG)
}

pub fn success_marker_path(output_dir: &Path) -> PathBuf {
    output_dir.join(SUCCESS_MARKER)
}

pub fn cycle_summary_path(output_dir: &Path) -> PathBuf {
    output_dir.join(CYCLE_SUMMARY)
}
