//! Immutable startup configuration.
//!
//! Scalars arrive from the environment (parsed by the binary); the ordered
//! stage table is either the built-in default or a YAML file:
//!
//! ```yaml
//! stages:
//!   - name: fetch
//!     command: ["python3", "fetch_all_sports.py"]
//!     policy: fatal
//!     retry_after_secs: 3600
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::{Schedule, Stage, StagePolicy, Trigger};

/// Primary environment variable holding the push credential.
pub const PRIMARY_TOKEN_VAR: &str = "GH_TOKEN";
/// Consulted only when [`PRIMARY_TOKEN_VAR`] is unset or empty.
pub const FALLBACK_TOKEN_VAR: &str = "GITHUB_TOKEN";

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_COMMIT_TEMPLATE: &str = "LockBox cycle {{ date }} ({{ overall }})";
pub const DEFAULT_OUTPUT_DIR: &str = "Output";
/// Artifact patterns inside the output directory, published when no
/// explicit globs are configured.
pub const DEFAULT_ARTIFACT_PATTERNS: &[&str] = &["*.csv", "*.json", "cycle.log"];

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// Opaque push token. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Resolve the credential from [`PRIMARY_TOKEN_VAR`], falling back to
    /// [`FALLBACK_TOKEN_VAR`]. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        [PRIMARY_TOKEN_VAR, FALLBACK_TOKEN_VAR]
            .into_iter()
            .filter_map(|var| lookup(var))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .map(Self)
    }

    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            name: "lockbox-bot".to_string(),
            email: "lockbox-bot@users.noreply.github.com".to_string(),
        }
    }
}

/// Settings for publishing artifacts to the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfig {
    pub remote_url: Option<String>,
    pub branch: String,
    pub artifact_globs: Vec<String>,
    pub commit_template: String,
    pub fetch_depth: u32,
    pub author: CommitAuthor,
    /// Publish even when a Fatal stage aborted the cycle.
    pub publish_on_abort: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            branch: DEFAULT_BRANCH.to_string(),
            artifact_globs: output_dir_globs(Path::new(DEFAULT_OUTPUT_DIR)),
            commit_template: DEFAULT_COMMIT_TEMPLATE.to_string(),
            fetch_depth: 1,
            author: CommitAuthor::default(),
            publish_on_abort: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Stage working directory and local repository root.
    pub workdir: PathBuf,
    /// Artifact, log and marker directory, relative to `workdir` unless absolute.
    pub output_dir: PathBuf,
    pub stages: Vec<Stage>,
    pub schedule: Schedule,
    /// Upper bound on backoff re-runs per scheduled cycle.
    pub max_retries: u32,
    /// Cycle log rotation threshold; `0` disables rotation.
    pub log_max_bytes: u64,
    pub publish: PublishConfig,
    pub credential: Option<Credential>,
}

impl Config {
    /// Configuration with the built-in stage table and a 06:00 UTC trigger.
    pub fn with_defaults(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            stages: default_stages(),
            schedule: Schedule {
                trigger: Trigger::DailyAt {
                    time: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
                    offset: utc(),
                },
                run_on_start: false,
            },
            max_retries: 1,
            log_max_bytes: 10 * 1024 * 1024,
            publish: PublishConfig::default(),
            credential: None,
        }
    }

    /// Output directory resolved against the working directory.
    pub fn resolved_output_dir(&self) -> PathBuf {
        if self.output_dir.is_absolute() {
            self.output_dir.clone()
        } else {
            self.workdir.join(&self.output_dir)
        }
    }

    /// The default artifact globs for the configured output directory,
    /// relative to the working directory.
    ///
    /// Fails when an absolute output directory lies outside the working
    /// directory: its files cannot be staged, so globs must be explicit.
    pub fn default_artifact_globs(&self) -> Result<Vec<String>, ConfigError> {
        let relative = if self.output_dir.is_absolute() {
            self.output_dir.strip_prefix(&self.workdir).map_err(|_| {
                ConfigError::Invalid(format!(
                    "output directory {} is outside the working directory {}; \
                     artifact globs must be set explicitly",
                    self.output_dir.display(),
                    self.workdir.display()
                ))
            })?
        } else {
            self.output_dir.as_path()
        };
        Ok(output_dir_globs(relative))
    }

    /// Check every startup invariant; the worker refuses to start otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_stages(&self.stages)?;

        if let Trigger::Every(interval) = self.schedule.trigger {
            if interval.is_zero() {
                return Err(ConfigError::Invalid(
                    "schedule interval must be greater than zero".to_string(),
                ));
            }
        }

        if self.publish.artifact_globs.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one artifact glob is required".to_string(),
            ));
        }
        if self.publish.branch.trim().is_empty() {
            return Err(ConfigError::Invalid("branch name is empty".to_string()));
        }
        if self.publish.fetch_depth == 0 {
            return Err(ConfigError::Invalid(
                "fetch depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn output_dir_globs(dir: &Path) -> Vec<String> {
    let prefix = dir
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    DEFAULT_ARTIFACT_PATTERNS
        .iter()
        .map(|pattern| {
            if prefix.is_empty() {
                pattern.to_string()
            } else {
                format!("{prefix}/{pattern}")
            }
        })
        .collect()
}

fn utc() -> FixedOffset {
    Utc.fix()
}

// ---------------------------------------------------------------------------
// Stage table
// ---------------------------------------------------------------------------

/// The production LockBox stage table.
///
/// | Stage    | Policy | Retry  |
/// |----------|--------|--------|
/// | fetch    | fatal  | 1 hour |
/// | predict  | fatal  | -      |
/// | settle   | skip   | -      |
/// | analyze  | skip   | -      |
/// | learn    | skip   | -      |
/// | validate | skip   | -      |
pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new("fetch", ["python3", "fetch_all_sports.py"], StagePolicy::Fatal)
            .with_retry_after_secs(60 * 60),
        Stage::new("predict", ["python3", "predictor_auto.py"], StagePolicy::Fatal),
        Stage::new("settle", ["python3", "settle_results.py"], StagePolicy::Skip),
        Stage::new("analyze", ["python3", "lockbox_analyze.py"], StagePolicy::Skip),
        Stage::new("learn", ["python3", "lockbox_learn.py"], StagePolicy::Skip),
        Stage::new("validate", ["python3", "lockbox_validate.py"], StagePolicy::Skip),
    ]
}

#[derive(Debug, Deserialize)]
struct StageTable {
    stages: Vec<Stage>,
}

/// Load and validate a YAML stage table.
///
/// Returns `ConfigError::Parse` (with path) on malformed YAML and
/// `ConfigError::Invalid` when the table breaks a stage invariant.
pub fn load_stages_at(path: &Path) -> Result<Vec<Stage>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table: StageTable =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    validate_stages(&table.stages)?;
    Ok(table.stages)
}

fn validate_stages(stages: &[Stage]) -> Result<(), ConfigError> {
    if stages.is_empty() {
        return Err(ConfigError::Invalid("stage table is empty".to_string()));
    }
    let mut seen = HashSet::new();
    for stage in stages {
        if stage.name.0.trim().is_empty() {
            return Err(ConfigError::Invalid("stage with empty name".to_string()));
        }
        if !seen.insert(stage.name.0.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate stage name '{}'",
                stage.name
            )));
        }
        match stage.program() {
            Some(program) if !program.trim().is_empty() => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "stage '{}' has an empty command",
                    stage.name
                )))
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scalar parsers
// ---------------------------------------------------------------------------

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, ConfigError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| ConfigError::Invalid(format!("invalid trigger time '{value}', expected HH:MM")))
}

/// Parse a fixed UTC offset: `Z`, `UTC`, `+HH:MM`, `-HH:MM` or `+HHMM`.
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || ConfigError::Invalid(format!("invalid UTC offset '{value}', expected +HH:MM"));
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(utc());
    }

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if minutes >= 60 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Split a comma-separated glob list, dropping blanks.
pub fn split_globs(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
