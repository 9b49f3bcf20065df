//! The supervised main loop: sleep, run the stages, publish, record.
//!
//! [`MainLoop`] is a three-state machine driven one transition at a time by
//! [`MainLoop::step`]. It has no terminal state and installs no signal
//! handlers; the host supervisor ends the process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lockbox_core::state::write_summary;
use lockbox_core::{
    Config, CycleLog, CycleOverall, CycleResult, CycleSummary, PublishResult, SuccessMarker,
};
use lockbox_pipeline::PipelineExecutor;
use lockbox_sync::{is_configuration_failure, Publisher};

use crate::clock::{Clock, SystemClock};
use crate::error::{io_err, DaemonError};
use crate::log_rotation::rotate_cycle_log;
use crate::paths::{cycle_log_path, cycle_summary_path, success_marker_path};
use crate::scheduler::delay_until_next;

/// Where the loop is between transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the scheduled trigger.
    Sleeping { delay: Duration },
    /// About to run a cycle; `attempt` is 0 for the scheduled run.
    Running { attempt: u32 },
    /// Waiting a stage's fixed retry delay before re-running the cycle.
    ErrorBackoff { delay: Duration, attempt: u32 },
}

/// Output format for console diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

pub struct MainLoop {
    config: Config,
    executor: PipelineExecutor,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    log: CycleLog,
    marker: SuccessMarker,
    summary_path: PathBuf,
    state: LoopState,
}

impl MainLoop {
    /// Open the cycle log (rotating it first if oversized) and pick the
    /// initial state from the schedule.
    pub fn new(
        config: Config,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DaemonError> {
        let output_dir = config.resolved_output_dir();
        std::fs::create_dir_all(&output_dir).map_err(|e| io_err(&output_dir, e))?;

        let log = CycleLog::open(cycle_log_path(&output_dir))?;
        rotate_cycle_log(&log, config.log_max_bytes)?;

        let state = if config.schedule.run_on_start {
            LoopState::Running { attempt: 0 }
        } else {
            LoopState::Sleeping {
                delay: delay_until_next(&config.schedule, clock.now())?,
            }
        };

        Ok(Self {
            executor: PipelineExecutor::new(&config.workdir),
            marker: SuccessMarker::new(success_marker_path(&output_dir)),
            summary_path: cycle_summary_path(&output_dir),
            config,
            publisher,
            clock,
            log,
            state,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn log(&self) -> &CycleLog {
        &self.log
    }

    pub fn marker(&self) -> &SuccessMarker {
        &self.marker
    }

    /// Loop forever. Returns only on a log write failure or a scheduler fault.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        self.log.info(format!(
            "lockbox worker started with {} stage(s) in {}",
            self.config.stages.len(),
            self.config.workdir.display()
        ))?;
        loop {
            self.step().await?;
        }
    }

    /// Perform one state transition. Returns the cycle summary when the
    /// transition ran a cycle.
    pub async fn step(&mut self) -> Result<Option<CycleSummary>, DaemonError> {
        match self.state {
            LoopState::Sleeping { delay } => {
                let wake_at = self.clock.now() + to_chrono(delay);
                self.log.info(format!(
                    "sleeping {}s until next cycle at {}",
                    delay.as_secs(),
                    wake_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                ))?;
                tokio::time::sleep(delay).await;
                self.state = LoopState::Running { attempt: 0 };
                Ok(None)
            }
            LoopState::ErrorBackoff { delay, attempt } => {
                let wake_at = self.clock.now() + to_chrono(delay);
                self.log.info(format!(
                    "backing off {}s until retry {attempt} at {}",
                    delay.as_secs(),
                    wake_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                ))?;
                tokio::time::sleep(delay).await;
                self.state = LoopState::Running { attempt };
                Ok(None)
            }
            LoopState::Running { attempt } => {
                let summary = self.run_attempt(attempt, true).await?;
                Ok(Some(summary))
            }
        }
    }

    /// Single-shot mode: one cycle and its publication, no backoff re-runs.
    pub async fn run_once(&mut self) -> Result<CycleSummary, DaemonError> {
        self.run_attempt(0, false).await
    }

    async fn run_attempt(
        &mut self,
        attempt: u32,
        allow_backoff: bool,
    ) -> Result<CycleSummary, DaemonError> {
        rotate_cycle_log(&self.log, self.config.log_max_bytes)?;

        let started_at = self.clock.now();
        if attempt == 0 {
            self.log.info("cycle starting")?;
        } else {
            self.log.info(format!(
                "cycle retry {attempt}/{} starting",
                self.config.max_retries
            ))?;
        }

        let cycle = self
            .executor
            .run_cycle(&self.config.stages, &self.log, started_at)
            .await?;
        self.log.info(format!(
            "cycle finished: {} ({}/{} stage(s) succeeded)",
            cycle.overall,
            cycle.succeeded(),
            self.config.stages.len()
        ))?;

        let backoff = match cycle.retry_after() {
            Some(delay) if allow_backoff && attempt < self.config.max_retries => Some(delay),
            _ => None,
        };

        if let Some(delay) = backoff {
            self.log.warn(format!(
                "retrying in {}s; publication deferred until the retry finishes",
                delay.as_secs()
            ))?;
            let summary = self.record(attempt, cycle, None, false)?;
            self.state = LoopState::ErrorBackoff {
                delay,
                attempt: attempt + 1,
            };
            return Ok(summary);
        }

        let publish_allowed =
            cycle.overall != CycleOverall::FatalAbort || self.config.publish.publish_on_abort;
        let publish = if publish_allowed {
            Some(self.publish(&cycle).await?)
        } else {
            self.log.warn("publication withheld after fatal abort")?;
            None
        };

        let marker_updated = cycle.overall == CycleOverall::Success
            && !publish.as_ref().is_some_and(PublishResult::is_failed);
        if marker_updated {
            let now = self.clock.now();
            self.marker.record(now, cycle.started_at)?;
            self.log.info("success marker updated")?;
        }

        let summary = self.record(attempt, cycle, publish, marker_updated)?;
        self.state = LoopState::Sleeping {
            delay: delay_until_next(&self.config.schedule, self.clock.now())?,
        };
        Ok(summary)
    }

    async fn publish(&self, cycle: &CycleResult) -> Result<PublishResult, DaemonError> {
        let publisher = Arc::clone(&self.publisher);
        let owned = cycle.clone();
        let result = tokio::task::spawn_blocking(move || publisher.publish(&owned))
            .await
            .map_err(|err| DaemonError::Join {
                task: "publish",
                message: err.to_string(),
            })?;
        // A published log is replaced on disk by the hard reset.
        self.log.reopen()?;

        match &result {
            PublishResult::Success { .. } | PublishResult::Skipped { .. } => {
                self.log.info(format!("publication {result}"))?;
            }
            PublishResult::Failed { kind, .. } => {
                self.log.error(format!("publication {result}"))?;
                if is_configuration_failure(*kind) {
                    self.log
                        .error("check the push credential, remote URL and branch settings")?;
                }
            }
        }
        Ok(result)
    }

    fn record(
        &self,
        attempt: u32,
        cycle: CycleResult,
        publish: Option<PublishResult>,
        marker_updated: bool,
    ) -> Result<CycleSummary, DaemonError> {
        let summary = CycleSummary {
            attempt,
            cycle,
            publish,
            marker_updated,
        };
        write_summary(&self.summary_path, &summary)?;
        Ok(summary)
    }
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

// ---------------------------------------------------------------------------
// Process entry points
// ---------------------------------------------------------------------------

/// Run the main loop on a fresh multi-threaded runtime, blocking the caller.
pub fn start_blocking(config: Config, publisher: Arc<dyn Publisher>) -> Result<(), DaemonError> {
    let runtime = build_runtime()?;
    runtime.block_on(async move {
        let mut main_loop = MainLoop::new(config, publisher, Arc::new(SystemClock))?;
        main_loop.run().await
    })
}

/// Run a single cycle and its publication, blocking the caller.
pub fn run_once_blocking(
    config: Config,
    publisher: Arc<dyn Publisher>,
) -> Result<CycleSummary, DaemonError> {
    let runtime = build_runtime()?;
    runtime.block_on(async move {
        let mut main_loop = MainLoop::new(config, publisher, Arc::new(SystemClock))?;
        main_loop.run_once().await
    })
}

fn build_runtime() -> Result<tokio::runtime::Runtime, DaemonError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))
}

/// Install the stderr subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = match format {
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init(),
    };
}
