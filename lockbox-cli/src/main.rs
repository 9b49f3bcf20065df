//! LockBox worker: runs the daily prediction pipeline and publishes its
//! artifacts to a git remote.
//!
//! # Usage
//!
//! ```text
//! lockbox            # run forever on the configured schedule
//! lockbox --once     # one cycle + publication, then exit
//! ```
//!
//! Every option can also be set through its `LOCKBOX_*` environment
//! variable; the push token is read from `GH_TOKEN` (fallback
//! `GITHUB_TOKEN`) and has no command-line flag.
//!
//! Exit status: `0` on success, `1` when a `--once` cycle aborted on a
//! fatal stage or the loop stopped on an unrecoverable error, `2` for
//! invalid configuration.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use lockbox_core::config::{
    self, parse_time_of_day, parse_utc_offset, split_globs, DEFAULT_BRANCH,
    DEFAULT_COMMIT_TEMPLATE,
};
use lockbox_core::{CommitAuthor, Config, Credential, CycleOverall, Schedule, Trigger};
use lockbox_daemon::log_rotation::MAX_LOG_BYTES;
use lockbox_daemon::{init_tracing, run_once_blocking, start_blocking, LogFormat};
use lockbox_sync::{GitCli, Publisher, Reconciler};

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "lockbox",
    version,
    about = "Run the LockBox daily pipeline and publish its artifacts",
    long_about = None,
)]
struct Cli {
    /// Working directory for stages and the local repository.
    #[arg(long, env = "LOCKBOX_WORKDIR", default_value = ".")]
    workdir: PathBuf,

    /// Artifact, log and marker directory, relative to the working directory.
    #[arg(long, env = "LOCKBOX_OUTPUT_DIR", default_value = "Output")]
    output_dir: PathBuf,

    /// YAML stage table; the built-in table is used when unset.
    #[arg(long, env = "LOCKBOX_STAGES_FILE")]
    stages_file: Option<PathBuf>,

    #[arg(long, env = "LOCKBOX_SCHEDULE", value_enum, default_value_t = ScheduleKind::Daily)]
    schedule: ScheduleKind,

    /// Daily trigger time, HH:MM[:SS].
    #[arg(long, env = "LOCKBOX_TRIGGER_AT", default_value = "06:00")]
    trigger_at: String,

    /// Fixed UTC offset of the trigger time (no daylight saving).
    #[arg(
        long,
        env = "LOCKBOX_TRIGGER_OFFSET",
        default_value = "+00:00",
        allow_hyphen_values = true
    )]
    trigger_offset: String,

    /// Period of the `interval` schedule, in seconds.
    #[arg(long, env = "LOCKBOX_INTERVAL_SECS", default_value_t = 86_400)]
    interval_secs: u64,

    /// Run one cycle immediately at start-up.
    #[arg(long, env = "LOCKBOX_RUN_ON_START")]
    run_on_start: bool,

    /// Upper bound on retry re-runs per scheduled cycle.
    #[arg(long, env = "LOCKBOX_MAX_RETRIES", default_value_t = 1)]
    max_retries: u32,

    /// Publish even when a fatal stage aborted the cycle.
    #[arg(long, env = "LOCKBOX_PUBLISH_ON_ABORT")]
    publish_on_abort: bool,

    #[arg(long, env = "LOCKBOX_REMOTE_URL")]
    remote_url: Option<String>,

    #[arg(long, env = "LOCKBOX_BRANCH", default_value = DEFAULT_BRANCH)]
    branch: String,

    /// Comma-separated artifact globs, relative to the working directory.
    /// Defaults to the CSV, JSON and log files of the output directory.
    #[arg(long, env = "LOCKBOX_ARTIFACT_GLOBS")]
    artifact_globs: Option<String>,

    /// Tera template for the commit message.
    #[arg(long, env = "LOCKBOX_COMMIT_MESSAGE", default_value = DEFAULT_COMMIT_TEMPLATE)]
    commit_message: String,

    #[arg(long, env = "LOCKBOX_FETCH_DEPTH", default_value_t = 1)]
    fetch_depth: u32,

    #[arg(long, env = "LOCKBOX_GIT_USER_NAME")]
    git_user_name: Option<String>,

    #[arg(long, env = "LOCKBOX_GIT_USER_EMAIL")]
    git_user_email: Option<String>,

    /// Cycle log rotation threshold in bytes; 0 disables rotation.
    #[arg(long, env = "LOCKBOX_LOG_MAX_BYTES", default_value_t = MAX_LOG_BYTES)]
    log_max_bytes: u64,

    #[arg(long, env = "LOCKBOX_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,

    /// Run a single cycle and its publication, then exit.
    #[arg(long)]
    once: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScheduleKind {
    /// Fixed time of day.
    Daily,
    /// Fixed delay after each cycle.
    Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn build_config(cli: &Cli) -> Result<Config> {
    let mut cfg = Config::with_defaults(&cli.workdir);
    cfg.output_dir = cli.output_dir.clone();

    if let Some(path) = &cli.stages_file {
        cfg.stages = config::load_stages_at(path)?;
    }

    let trigger = match cli.schedule {
        ScheduleKind::Daily => Trigger::DailyAt {
            time: parse_time_of_day(&cli.trigger_at)?,
            offset: parse_utc_offset(&cli.trigger_offset)?,
        },
        ScheduleKind::Interval => Trigger::Every(Duration::from_secs(cli.interval_secs)),
    };
    cfg.schedule = Schedule {
        trigger,
        run_on_start: cli.run_on_start,
    };
    cfg.max_retries = cli.max_retries;
    cfg.log_max_bytes = cli.log_max_bytes;

    let artifact_globs = match &cli.artifact_globs {
        Some(globs) => split_globs(globs),
        None => cfg.default_artifact_globs()?,
    };

    let publish = &mut cfg.publish;
    publish.remote_url = cli
        .remote_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string);
    publish.branch = cli.branch.clone();
    publish.artifact_globs = artifact_globs;
    publish.commit_template = cli.commit_message.clone();
    publish.fetch_depth = cli.fetch_depth;
    publish.publish_on_abort = cli.publish_on_abort;
    let default_author = CommitAuthor::default();
    publish.author = CommitAuthor {
        name: cli.git_user_name.clone().unwrap_or(default_author.name),
        email: cli.git_user_email.clone().unwrap_or(default_author.email),
    };

    cfg.credential = Credential::from_env();
    cfg.validate()?;
    Ok(cfg)
}

fn build_publisher(cfg: &Config) -> Result<Arc<dyn Publisher>> {
    let store = GitCli::new(&cfg.workdir, cfg.publish.author.clone());
    let reconciler = Reconciler::new(store, cfg.publish.clone(), cfg.credential.clone())
        .context("invalid commit message template")?;
    Ok(Arc::new(reconciler))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format.into());

    let (cfg, publisher) = match build_config(&cli).and_then(|cfg| {
        let publisher = build_publisher(&cfg)?;
        Ok((cfg, publisher))
    }) {
        Ok(pair) => pair,
        Err(err) => {
            eprintln!("lockbox: configuration error: {err:#}");
            return ExitCode::from(2);
        }
    };

    let outcome = if cli.once {
        run_once(cfg, publisher)
    } else {
        start_blocking(cfg, publisher)
            .context("worker loop stopped")
            .map(|()| ExitCode::SUCCESS)
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("lockbox: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_once(cfg: Config, publisher: Arc<dyn Publisher>) -> Result<ExitCode> {
    let summary = run_once_blocking(cfg, publisher).context("cycle failed")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("failed to render cycle summary JSON")?
    );

    if summary.cycle.overall == CycleOverall::FatalAbort {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
