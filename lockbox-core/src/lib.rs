//! LockBox core library: domain types, configuration, cycle log, state files.
//!
//! - [`types`]: stages, cycle and publish results, schedules
//! - [`config`]: immutable startup configuration and the stage table
//! - [`cycle_log`]: append-only [`CycleLog`]
//! - [`state`]: [`SuccessMarker`] and the cycle summary file
//! - [`error`]: [`ConfigError`], [`LogError`]

pub mod config;
pub mod cycle_log;
pub mod error;
pub mod state;
pub mod types;

pub use config::{CommitAuthor, Config, Credential, PublishConfig};
pub use cycle_log::{CycleLog, OutputStream, Severity};
pub use error::{ConfigError, LogError};
pub use state::{CycleSummary, SuccessMarker, SuccessRecord};
pub use types::{
    CycleOverall, CycleResult, FailureKind, PublishResult, Schedule, Stage, StageExit, StageName,
    StageOutcome, StagePolicy, SyncStep, Trigger,
};
