//! Domain types for the LockBox worker.
//!
//! Stages are configured once at start and never mutated. Cycle and publish
//! results are cycle-scoped values that flow from the executor and the
//! reconciler into the cycle log and the summary file.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageName(pub String);

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for StageName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StageName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// What a stage failure does to the rest of the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagePolicy {
    /// Failure aborts the remaining stages of the cycle.
    Fatal,
    /// Failure is logged and the next stage still runs.
    Skip,
}

impl fmt::Display for StagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagePolicy::Fatal => write!(f, "fatal"),
            StagePolicy::Skip => write!(f, "skip"),
        }
    }
}

/// One ordered unit of pipeline work backed by an external program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: StageName,
    /// Program followed by its arguments. Never empty once validated.
    pub command: Vec<String>,
    pub policy: StagePolicy,
    /// Re-run the cycle after this many seconds when this stage aborts it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl Stage {
    pub fn new<I, S>(name: impl Into<StageName>, command: I, policy: StagePolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            policy,
            retry_after_secs: None,
        }
    }

    /// Retry delay in whole seconds, as stored in the stage table.
    pub fn with_retry_after_secs(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or(&[])
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs.map(Duration::from_secs)
    }

    /// Command line for log records.
    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }
}

// ---------------------------------------------------------------------------
// Cycle results
// ---------------------------------------------------------------------------

/// Exit status of one stage process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageExit {
    Success,
    /// `code` is `None` when the process was killed by a signal or never
    /// started.
    Failed { code: Option<i32> },
}

impl StageExit {
    pub fn is_success(&self) -> bool {
        matches!(self, StageExit::Success)
    }
}

impl fmt::Display for StageExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageExit::Success => write!(f, "success"),
            StageExit::Failed { code: Some(code) } => write!(f, "failed (exit code {code})"),
            StageExit::Failed { code: None } => write!(f, "failed (no exit code)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub exit: StageExit,
    /// True only for the Fatal stage whose failure ended the cycle.
    pub aborted: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOverall {
    Success,
    PartialFailure,
    FatalAbort,
}

impl fmt::Display for CycleOverall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOverall::Success => write!(f, "success"),
            CycleOverall::PartialFailure => write!(f, "partial failure"),
            CycleOverall::FatalAbort => write!(f, "fatal abort"),
        }
    }
}

/// Outcome of one run over the configured stages.
///
/// `outcomes` is always a prefix of the configured stage list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<StageOutcome>,
    pub overall: CycleOverall,
}

impl CycleResult {
    /// Build a result and derive `overall` from the recorded outcomes.
    pub fn from_outcomes(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcomes: Vec<StageOutcome>,
    ) -> Self {
        let overall = if outcomes.iter().any(|o| o.aborted) {
            CycleOverall::FatalAbort
        } else if outcomes.iter().all(|o| o.exit.is_success()) {
            CycleOverall::Success
        } else {
            CycleOverall::PartialFailure
        };
        Self {
            started_at,
            finished_at,
            outcomes,
            overall,
        }
    }

    pub fn aborted_stage(&self) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.aborted)
    }

    /// Backoff requested by the stage that aborted this cycle, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.aborted_stage().and_then(|o| o.stage.retry_after())
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.exit.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

// ---------------------------------------------------------------------------
// Publication
// ---------------------------------------------------------------------------

/// Steps of the reconciliation sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    Prepare,
    Fetch,
    SelectBranch,
    Reset,
    Stage,
    Commit,
    Rebase,
    Push,
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStep::Prepare => "prepare",
            SyncStep::Fetch => "fetch",
            SyncStep::SelectBranch => "select-branch",
            SyncStep::Reset => "reset",
            SyncStep::Stage => "stage",
            SyncStep::Commit => "commit",
            SyncStep::Rebase => "rebase",
            SyncStep::Push => "push",
        };
        f.write_str(name)
    }
}

/// Classified cause of a failed reconciliation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Authentication,
    Network,
    Rejected,
    Conflict,
    MissingRemoteRef,
    Io,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Authentication => "authentication failure",
            FailureKind::Network => "network failure",
            FailureKind::Rejected => "push rejected",
            FailureKind::Conflict => "conflict",
            FailureKind::MissingRemoteRef => "remote branch missing",
            FailureKind::Io => "local I/O failure",
            FailureKind::Other => "command failure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PublishResult {
    /// The branch tip now at the remote, and whether this call created a commit.
    Success { head: String, committed: bool },
    Skipped { reason: String },
    Failed {
        step: SyncStep,
        kind: FailureKind,
        reason: String,
    },
}

impl PublishResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, PublishResult::Failed { .. })
    }
}

impl fmt::Display for PublishResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishResult::Success { head, committed: true } => {
                write!(f, "published {head}")
            }
            PublishResult::Success {
                head,
                committed: false,
            } => write!(f, "published {head} (no artifact changes)"),
            PublishResult::Skipped { reason } => write!(f, "skipped: {reason}"),
            PublishResult::Failed { step, kind, reason } => {
                write!(f, "failed at {step} ({kind}): {reason}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// When cycles are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fixed time of day in a fixed UTC offset; no daylight-saving handling.
    DailyAt { time: NaiveTime, offset: FixedOffset },
    /// Fixed delay after each cycle finishes.
    Every(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub trigger: Trigger,
    /// Start with an immediate cycle instead of sleeping first.
    pub run_on_start: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
