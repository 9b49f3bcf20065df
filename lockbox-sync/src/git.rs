//! Remote store primitives.
//!
//! [`RemoteStore`] is the narrow set of repository operations the
//! [`Reconciler`](crate::Reconciler) sequences. [`GitCli`] implements it by
//! shelling out to the `git` executable inside the working directory.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use lockbox_core::CommitAuthor;

use crate::error::{io_err, SyncError};

/// Repository operations used by one publish attempt.
///
/// `url` arguments may embed a credential; implementations must not let it
/// reach logs or error messages.
pub trait RemoteStore {
    /// Local repository root; artifact paths are relative to it.
    fn workdir(&self) -> &Path;

    /// Make sure `workdir` is a repository, initialising one if needed.
    fn ensure_repository(&self) -> Result<(), SyncError>;

    /// Fetch `branch` from `url`; returns the fetched tip. A `depth` of 0
    /// fetches full history.
    fn fetch(&self, url: &str, branch: &str, depth: u32) -> Result<String, SyncError>;

    fn branch_exists(&self, branch: &str) -> Result<bool, SyncError>;

    fn create_branch(&self, branch: &str, tip: &str) -> Result<(), SyncError>;

    /// Point HEAD at `branch` without touching the working tree.
    fn switch_branch(&self, branch: &str) -> Result<(), SyncError>;

    /// Existing files matching any glob, tracked or untracked but not ignored.
    fn list_artifacts(&self, globs: &[String]) -> Result<Vec<PathBuf>, SyncError>;

    /// Reset branch, index and working tree to `tip`.
    fn reset_hard(&self, tip: &str) -> Result<(), SyncError>;

    fn stage(&self, paths: &[PathBuf]) -> Result<(), SyncError>;

    fn has_staged_changes(&self) -> Result<bool, SyncError>;

    fn commit(&self, message: &str) -> Result<(), SyncError>;

    /// Rebase local commits onto the remote branch. A half-applied rebase is
    /// aborted before the error is returned.
    fn pull_rebase(&self, url: &str, branch: &str) -> Result<(), SyncError>;

    fn force_push(&self, url: &str, branch: &str) -> Result<(), SyncError>;

    fn head(&self) -> Result<String, SyncError>;
}

// ---------------------------------------------------------------------------
// Credentials in URLs
// ---------------------------------------------------------------------------

/// Embed `token` into an HTTP(S) remote URL. Other schemes (ssh, file, local
/// paths) are returned unchanged.
pub fn authenticated_url(url: &str, token: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    if !scheme.eq_ignore_ascii_case("https") && !scheme.eq_ignore_ascii_case("http") {
        return url.to_string();
    }
    let host_and_path = match userinfo_end(rest) {
        Some(at) => &rest[at + 1..],
        None => rest,
    };
    format!("{scheme}://x-access-token:{token}@{host_and_path}")
}

/// Replace the userinfo part of every URL in `text` with `***`.
pub fn redact_credentials(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find("://") {
        let (head, tail) = rest.split_at(idx + 3);
        out.push_str(head);
        match userinfo_end(tail) {
            Some(at) => {
                out.push_str("***");
                rest = &tail[at..];
            }
            None => rest = tail,
        }
    }
    out.push_str(rest);
    out
}

/// Index of the `@` ending the authority's userinfo, if any.
fn userinfo_end(authority_and_rest: &str) -> Option<usize> {
    let authority_len = authority_and_rest
        .find(|c: char| c == '/' || c == '?' || c == '#' || c.is_whitespace() || c == '\'')
        .unwrap_or(authority_and_rest.len());
    authority_and_rest[..authority_len].rfind('@')
}

// ---------------------------------------------------------------------------
// git CLI implementation
// ---------------------------------------------------------------------------

/// [`RemoteStore`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
    author: CommitAuthor,
    program: PathBuf,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>, author: CommitAuthor) -> Self {
        Self {
            workdir: workdir.into(),
            author,
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git executable instead of the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .arg("-c")
            .arg(format!("user.name={}", self.author.name))
            .arg("-c")
            .arg(format!("user.email={}", self.author.email))
            .args(["-c", "commit.gpgsign=false", "-c", "core.quotepath=off"])
            .args(args);
        cmd
    }

    /// Run git and return the raw output, whatever the exit status.
    fn output(&self, args: &[&str]) -> Result<Output, SyncError> {
        self.command(args).output().map_err(SyncError::Spawn)
    }

    /// Run git, failing on a non-zero exit; returns trimmed stdout.
    fn run(&self, args: &[&str]) -> Result<String, SyncError> {
        let output = self.output(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(git_failure(args, &output))
        }
    }

    /// Run git where exit code 1 means "no" rather than failure.
    fn probe(&self, args: &[&str]) -> Result<bool, SyncError> {
        let output = self.output(args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(git_failure(args, &output)),
        }
    }

    fn rebase_in_progress(&self) -> bool {
        ["rebase-merge", "rebase-apply"].iter().any(|name| {
            self.run(&["rev-parse", "--git-path", name])
                .map(|p| self.workdir.join(p).exists())
                .unwrap_or(false)
        })
    }
}

fn git_failure(args: &[&str], output: &Output) -> SyncError {
    let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        stderr = String::from_utf8_lossy(&output.stdout).trim().to_string();
    }
    SyncError::Git {
        command: redact_credentials(&format!("git {}", args.join(" "))),
        status: output.status.to_string(),
        stderr: redact_credentials(&stderr),
    }
}

/// Literal globs become `:(glob)` pathspecs so `*` stops at `/`; pathspecs
/// that already carry magic pass through.
fn pathspec(glob: &str) -> String {
    if glob.starts_with(':') {
        glob.to_string()
    } else {
        format!(":(glob){glob}")
    }
}

impl RemoteStore for GitCli {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn ensure_repository(&self) -> Result<(), SyncError> {
        if self.workdir.join(".git").exists() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.workdir).map_err(|e| io_err(&self.workdir, e))?;
        self.run(&["init", "--quiet"])?;
        tracing::info!(workdir = %self.workdir.display(), "initialised local repository");
        Ok(())
    }

    fn fetch(&self, url: &str, branch: &str, depth: u32) -> Result<String, SyncError> {
        let refspec = format!("refs/heads/{branch}");
        let depth_arg = format!("--depth={depth}");
        let mut args = vec!["fetch", "--quiet", "--no-tags"];
        if depth > 0 {
            args.push(&depth_arg);
        }
        args.extend([url, refspec.as_str()]);
        self.run(&args)?;
        self.run(&["rev-parse", "--verify", "FETCH_HEAD^{commit}"])
    }

    fn branch_exists(&self, branch: &str) -> Result<bool, SyncError> {
        let reference = format!("refs/heads/{branch}");
        self.probe(&["rev-parse", "--verify", "--quiet", &reference])
    }

    fn create_branch(&self, branch: &str, tip: &str) -> Result<(), SyncError> {
        self.run(&["branch", branch, tip]).map(drop)
    }

    fn switch_branch(&self, branch: &str) -> Result<(), SyncError> {
        let reference = format!("refs/heads/{branch}");
        self.run(&["symbolic-ref", "HEAD", &reference]).map(drop)
    }

    fn list_artifacts(&self, globs: &[String]) -> Result<Vec<PathBuf>, SyncError> {
        if globs.is_empty() {
            return Ok(Vec::new());
        }
        let specs: Vec<String> = globs.iter().map(|g| pathspec(g)).collect();
        let mut args = vec!["ls-files", "-z", "--cached", "--others", "--exclude-standard", "--"];
        args.extend(specs.iter().map(String::as_str));

        let output = self.output(&args)?;
        if !output.status.success() {
            return Err(git_failure(&args, &output));
        }

        let paths: BTreeSet<PathBuf> = output
            .stdout
            .split(|b| *b == 0)
            .filter(|entry| !entry.is_empty())
            .map(|entry| PathBuf::from(String::from_utf8_lossy(entry).into_owned()))
            .filter(|path| self.workdir.join(path).is_file())
            .collect();
        Ok(paths.into_iter().collect())
    }

    fn reset_hard(&self, tip: &str) -> Result<(), SyncError> {
        self.run(&["reset", "--quiet", "--hard", tip]).map(drop)
    }

    fn stage(&self, paths: &[PathBuf]) -> Result<(), SyncError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut cmd = self.command(["add", "--"]);
        cmd.args(paths);
        let output = cmd.output().map_err(SyncError::Spawn)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(git_failure(&["add", "--", "<artifacts>"], &output))
        }
    }

    fn has_staged_changes(&self) -> Result<bool, SyncError> {
        // `diff --quiet` exits 1 when there are differences.
        self.probe(&["diff", "--cached", "--quiet"]).map(|same| !same)
    }

    fn commit(&self, message: &str) -> Result<(), SyncError> {
        self.run(&["commit", "--quiet", "--no-verify", "-m", message]).map(drop)
    }

    fn pull_rebase(&self, url: &str, branch: &str) -> Result<(), SyncError> {
        let args = ["pull", "--quiet", "--rebase", "--autostash", "--no-tags", url, branch];
        match self.run(&args) {
            Ok(_) => Ok(()),
            Err(err) => {
                if self.rebase_in_progress() {
                    if let Err(abort) = self.run(&["rebase", "--abort"]) {
                        tracing::warn!(error = %abort, "failed to abort rebase");
                    }
                }
                Err(err)
            }
        }
    }

    fn force_push(&self, url: &str, branch: &str) -> Result<(), SyncError> {
        let target = format!("HEAD:refs/heads/{branch}");
        self.run(&["push", "--quiet", "--force", "--no-verify", url, &target]).map(drop)
    }

    fn head(&self) -> Result<String, SyncError> {
        self.run(&["rev-parse", "HEAD"])
    }
}
