use std::path::PathBuf;

use thiserror::Error;

use lockbox_core::LogError;

use crate::scheduler::SchedulerFault;

/// Errors that stop the main loop. Stage and publish failures are values
/// and never show up here.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cycle log error: {0}")]
    Log(#[from] LogError),

    #[error("scheduler fault: {0}")]
    Scheduler(#[from] SchedulerFault),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
