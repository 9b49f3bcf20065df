//! Error types for lockbox-sync.

use std::path::PathBuf;

use thiserror::Error;

use lockbox_core::FailureKind;

/// All errors that can arise while reconciling with the remote store.
///
/// Command lines and captured stderr are already redacted of URL
/// credentials when they land here.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A git command ran and exited unsuccessfully.
    #[error("`{command}` exited with {status}: {stderr}")]
    Git {
        command: String,
        status: String,
        stderr: String,
    },

    /// The git executable could not be started.
    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The commit message template did not render.
    #[error("commit message template error: {0}")]
    Template(#[from] tera::Error),

    #[error("commit message template rendered an empty message")]
    EmptyMessage,
}

impl SyncError {
    /// Classify the failure for the log and the publish result.
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::Git { stderr, .. } => classify_stderr(stderr),
            SyncError::Spawn(_) | SyncError::Io { .. } => FailureKind::Io,
            SyncError::Template(_) | SyncError::EmptyMessage => FailureKind::Other,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Map git's stderr to a failure class. Order matters: HTTPS auth failures
/// also mention "unable to access".
pub(crate) fn classify_stderr(stderr: &str) -> FailureKind {
    let text = stderr.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&[
        "authentication failed",
        "could not read username",
        "could not read password",
        "invalid username or password",
        "permission denied",
        "the requested url returned error: 401",
        "the requested url returned error: 403",
    ]) {
        FailureKind::Authentication
    } else if has(&["couldn't find remote ref", "could not find remote ref"]) {
        FailureKind::MissingRemoteRef
    } else if has(&[
        "could not resolve host",
        "connection timed out",
        "failed to connect",
        "connection refused",
        "network is unreachable",
        "unable to access",
        "early eof",
    ]) {
        FailureKind::Network
    } else if has(&["[rejected]", "[remote rejected]", "non-fast-forward", "protected branch"]) {
        FailureKind::Rejected
    } else if has(&["conflict", "could not apply"]) {
        FailureKind::Conflict
    } else {
        FailureKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_git_failures() {
        let cases = [
            (
                "fatal: Authentication failed for 'https://github.com/o/r.git/'",
                FailureKind::Authentication,
            ),
            (
                "fatal: unable to access 'https://github.com/o/r.git/': The requested URL returned error: 403",
                FailureKind::Authentication,
            ),
            (
                "fatal: couldn't find remote ref refs/heads/main",
                FailureKind::MissingRemoteRef,
            ),
            (
                "fatal: unable to access 'https://github.com/o/r.git/': Could not resolve host: github.com",
                FailureKind::Network,
            ),
            (
                " ! [remote rejected] HEAD -> main (protected branch hook declined)",
                FailureKind::Rejected,
            ),
            (
                "CONFLICT (content): Merge conflict in Output/metrics.json",
                FailureKind::Conflict,
            ),
            ("fatal: something else", FailureKind::Other),
        ];
        for (stderr, expected) in cases {
            assert_eq!(classify_stderr(stderr), expected, "stderr: {stderr}");
        }
    }

    #[test]
    fn io_errors_are_local() {
        let err = io_err("Output/a.csv", std::io::Error::other("disk full"));
        assert_eq!(err.kind(), FailureKind::Io);
        assert!(err.to_string().contains("Output/a.csv"));
    }
}
