//! Ordered stage execution with per-stage failure policy.
//!
//! Stages run one at a time in configuration order; each reads files the
//! previous one wrote. Output lines are appended to the [`CycleLog`] as they
//! arrive rather than after the process exits.

use std::path::PathBuf;
use std::process::Stdio;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;

use lockbox_core::{
    CycleLog, CycleResult, LogError, OutputStream, Stage, StageExit, StageOutcome, StagePolicy,
};

/// Runs stage processes inside a fixed working directory.
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    workdir: PathBuf,
}

impl PipelineExecutor {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Run every stage once, in order.
    ///
    /// A failing `Fatal` stage stops the cycle; a failing `Skip` stage is
    /// logged as a warning and the next stage runs. The only error is a
    /// failure to write the cycle log.
    pub async fn run_cycle(
        &self,
        stages: &[Stage],
        log: &CycleLog,
        started_at: DateTime<Utc>,
    ) -> Result<CycleResult, LogError> {
        let mut outcomes = Vec::with_capacity(stages.len());

        for (index, stage) in stages.iter().enumerate() {
            log.info(format!(
                "stage {}/{} '{}' starting: {}",
                index + 1,
                stages.len(),
                stage.name,
                stage.display_command()
            ))?;

            let started = Instant::now();
            let exit = self.run_stage(stage, log).await?;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let aborted = !exit.is_success() && stage.policy == StagePolicy::Fatal;
            match (exit, stage.policy) {
                (StageExit::Success, _) => {
                    log.info(format!(
                        "stage '{}' succeeded in {duration_ms} ms",
                        stage.name
                    ))?;
                }
                (StageExit::Failed { .. }, StagePolicy::Skip) => {
                    log.warn(format!(
                        "stage '{}' {exit} (policy skip); continuing",
                        stage.name
                    ))?;
                }
                (StageExit::Failed { .. }, StagePolicy::Fatal) => {
                    log.error(format!(
                        "stage '{}' {exit} (policy fatal); aborting cycle, {} stage(s) not run",
                        stage.name,
                        stages.len() - index - 1
                    ))?;
                }
            }

            outcomes.push(StageOutcome {
                stage: stage.clone(),
                exit,
                aborted,
                duration_ms,
            });

            if aborted {
                break;
            }
        }

        Ok(CycleResult::from_outcomes(started_at, Utc::now(), outcomes))
    }

    async fn run_stage(&self, stage: &Stage, log: &CycleLog) -> Result<StageExit, LogError> {
        let Some(program) = stage.program() else {
            log.error(format!("stage '{}' has no command", stage.name))?;
            return Ok(StageExit::Failed { code: None });
        };

        let mut child = match Command::new(program)
            .args(stage.args())
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => {
                tracing::debug!(stage = %stage.name, pid = ?child.id(), "stage process spawned");
                child
            }
            Err(err) => {
                log.error(format!(
                    "stage '{}' could not launch '{program}': {err}",
                    stage.name
                ))?;
                return Ok(StageExit::Failed { code: None });
            }
        };

        if let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) {
            let mut stdout = BufReader::new(stdout).split(b'\n');
            let mut stderr = BufReader::new(stderr).split(b'\n');
            let mut stdout_open = true;
            let mut stderr_open = true;

            while stdout_open || stderr_open {
                tokio::select! {
                    segment = stdout.next_segment(), if stdout_open => {
                        stdout_open = forward_segment(segment, stage, OutputStream::Stdout, log)?;
                    }
                    segment = stderr.next_segment(), if stderr_open => {
                        stderr_open = forward_segment(segment, stage, OutputStream::Stderr, log)?;
                    }
                }
            }
        }

        match child.wait().await {
            Ok(status) if status.success() => Ok(StageExit::Success),
            Ok(status) => Ok(StageExit::Failed {
                code: status.code(),
            }),
            Err(err) => {
                log.error(format!(
                    "stage '{}' could not be awaited: {err}",
                    stage.name
                ))?;
                Ok(StageExit::Failed { code: None })
            }
        }
    }
}

/// Append one output line; returns whether the stream is still open.
fn forward_segment(
    segment: std::io::Result<Option<Vec<u8>>>,
    stage: &Stage,
    stream: OutputStream,
    log: &CycleLog,
) -> Result<bool, LogError> {
    match segment {
        Ok(Some(bytes)) => {
            let line = String::from_utf8_lossy(&bytes);
            log.stage_output(&stage.name, stream, line.trim_end_matches('\r'))?;
            Ok(true)
        }
        Ok(None) => Ok(false),
        Err(err) => {
            log.warn(format!(
                "stage '{}' {stream} unreadable: {err}",
                stage.name
            ))?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_core::CycleOverall;
    use tempfile::TempDir;

    fn sh(name: &str, script: &str, policy: StagePolicy) -> Stage {
        Stage::new(name, ["sh", "-c", script], policy)
    }

    fn setup() -> (TempDir, CycleLog, PipelineExecutor) {
        let dir = TempDir::new().unwrap();
        let log = CycleLog::open(dir.path().join("Output").join("cycle.log")).unwrap();
        let executor = PipelineExecutor::new(dir.path());
        (dir, log, executor)
    }

    fn log_text(log: &CycleLog) -> String {
        std::fs::read_to_string(log.path()).unwrap()
    }

    #[tokio::test]
    async fn all_stages_succeed() {
        let (_dir, log, executor) = setup();
        let stages = vec![
            sh("fetch", "exit 0", StagePolicy::Fatal),
            sh("predict", "exit 0", StagePolicy::Fatal),
            sh("settle", "exit 0", StagePolicy::Skip),
        ];

        let result = executor.run_cycle(&stages, &log, Utc::now()).await.unwrap();

        assert_eq!(result.overall, CycleOverall::Success);
        assert_eq!(result.outcomes.len(), stages.len());
        assert!(result.outcomes.iter().all(|o| o.exit == StageExit::Success && !o.aborted));
    }

    #[tokio::test]
    async fn fatal_failure_stops_the_cycle() {
        let (_dir, log, executor) = setup();
        let stages = vec![
            sh("fetch", "exit 0", StagePolicy::Fatal),
            sh("predict", "exit 7", StagePolicy::Fatal),
            sh("settle", "exit 0", StagePolicy::Skip),
            sh("learn", "exit 0", StagePolicy::Skip),
        ];

        let result = executor.run_cycle(&stages, &log, Utc::now()).await.unwrap();

        assert_eq!(result.overall, CycleOverall::FatalAbort);
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.outcomes[0].exit, StageExit::Success);
        assert_eq!(result.outcomes[1].exit, StageExit::Failed { code: Some(7) });
        assert!(result.outcomes[1].aborted);
        assert!(log_text(&log).contains("stage 'predict' failed (exit code 7) (policy fatal)"));
    }

    #[tokio::test]
    async fn skip_failure_continues() {
        let (_dir, log, executor) = setup();
        let stages = vec![
            sh("fetch", "exit 0", StagePolicy::Fatal),
            sh("predict", "exit 0", StagePolicy::Fatal),
            sh("settle", "exit 1", StagePolicy::Skip),
            sh("learn", "exit 0", StagePolicy::Skip),
        ];

        let result = executor.run_cycle(&stages, &log, Utc::now()).await.unwrap();

        assert_eq!(result.overall, CycleOverall::PartialFailure);
        assert_eq!(result.outcomes.len(), 4);
        assert_eq!(result.outcomes[2].exit, StageExit::Failed { code: Some(1) });
        assert!(!result.outcomes[2].aborted);
        assert_eq!(result.outcomes[3].exit, StageExit::Success);
        assert!(log_text(&log).contains("WARN stage 'settle' failed (exit code 1) (policy skip)"));
    }

    #[tokio::test]
    async fn stage_output_is_logged_with_stream_tags() {
        let (_dir, log, executor) = setup();
        let stages = vec![sh(
            "fetch",
            "echo fetched 12 games; echo rate limited >&2",
            StagePolicy::Fatal,
        )];

        executor.run_cycle(&stages, &log, Utc::now()).await.unwrap();

        let text = log_text(&log);
        assert!(text.contains("INFO [fetch:stdout] fetched 12 games"), "{text}");
        assert!(text.contains("INFO [fetch:stderr] rate limited"), "{text}");
    }

    #[tokio::test]
    async fn output_reaches_the_log_while_the_stage_is_still_running() {
        let (dir, log, executor) = setup();
        let go = dir.path().join("go");
        let stages = vec![sh(
            "fetch",
            "echo early; while [ ! -f go ]; do sleep 0.1; done; echo late",
            StagePolicy::Fatal,
        )];

        let watch = async {
            let mut seen_early = false;
            for _ in 0..200 {
                let text = std::fs::read_to_string(log.path()).unwrap_or_default();
                if text.contains("[fetch:stdout] early") {
                    seen_early = !text.contains("[fetch:stdout] late");
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(25)).await;
            }
            std::fs::write(&go, "").unwrap();
            seen_early
        };

        let (result, seen_early) = tokio::join!(executor.run_cycle(&stages, &log, Utc::now()), watch);

        assert!(seen_early, "stage output was not in the log before the stage exited");
        assert_eq!(result.unwrap().overall, CycleOverall::Success);
        assert!(log_text(&log).contains("[fetch:stdout] late"));
    }

    #[tokio::test]
    async fn stages_run_in_workdir_and_see_previous_output() {
        let (dir, log, executor) = setup();
        let stages = vec![
            sh("predict", "echo pick > picks.csv", StagePolicy::Fatal),
            sh("settle", "test -f picks.csv", StagePolicy::Fatal),
        ];

        let result = executor.run_cycle(&stages, &log, Utc::now()).await.unwrap();

        assert_eq!(result.overall, CycleOverall::Success);
        assert!(dir.path().join("picks.csv").exists());
    }

    #[tokio::test]
    async fn missing_program_is_a_stage_failure() {
        let (_dir, log, executor) = setup();
        let stages = vec![
            Stage::new("fetch", ["lockbox-no-such-program"], StagePolicy::Skip),
            sh("predict", "exit 0", StagePolicy::Fatal),
        ];

        let result = executor.run_cycle(&stages, &log, Utc::now()).await.unwrap();

        assert_eq!(result.outcomes[0].exit, StageExit::Failed { code: None });
        assert_eq!(result.overall, CycleOverall::PartialFailure);
        assert!(log_text(&log).contains("could not launch 'lockbox-no-such-program'"));
    }

    #[tokio::test]
    async fn non_utf8_output_does_not_stall_the_stage() {
        let (_dir, log, executor) = setup();
        let stages = vec![sh("fetch", "printf '\\377\\376 raw\\n'; exit 0", StagePolicy::Fatal)];

        let result = executor.run_cycle(&stages, &log, Utc::now()).await.unwrap();

        assert_eq!(result.overall, CycleOverall::Success);
        assert!(log_text(&log).contains("[fetch:stdout]"));
    }
}
