//! Error types for lockbox-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while assembling or validating the startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stage table file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on the stage table; includes the file path.
    #[error("failed to parse stage table at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A value is present but unusable (bad time, duplicate stage, …).
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure to write the cycle log, success marker or cycle summary.
///
/// A worker that cannot record its own state must not keep running, so
/// callers propagate this instead of recovering.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) fn log_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LogError {
    LogError::Io {
        path: path.into(),
        source,
    }
}
