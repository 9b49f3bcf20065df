//! `lockbox --once`: one cycle, summary on stdout, exit status by outcome.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// The binary with a clean environment: no token, no `LOCKBOX_*` leakage.
fn lockbox(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("lockbox").expect("lockbox binary");
    cmd.env_clear()
        .env("PATH", std::env::var_os("PATH").unwrap_or_default())
        .env("LOCKBOX_WORKDIR", workdir);
    cmd
}

fn stages_file(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("stages.yaml");
    fs::write(&path, body).expect("write stages");
    path
}

const HEALTHY: &str = r#"
stages:
  - name: fetch
    command: ["sh", "-c", "echo fetched 3 games; mkdir -p Output; echo a,b > Output/games.csv"]
    policy: fatal
  - name: predict
    command: ["sh", "-c", "cp Output/games.csv Output/Predictions_latest.csv"]
    policy: fatal
"#;

#[test]
fn successful_cycle_writes_marker_and_log() {
    let dir = TempDir::new().unwrap();
    let stages = stages_file(&dir, HEALTHY);

    lockbox(dir.path())
        .env("LOCKBOX_STAGES_FILE", &stages)
        .arg("--once")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""overall": "success""#))
        .stdout(predicate::str::contains(r#""result": "skipped""#));

    let output = dir.path().join("Output");
    assert!(output.join("last_success.json").exists());
    assert!(output.join("last_cycle.json").exists());
    let log = fs::read_to_string(output.join("cycle.log")).unwrap();
    assert!(log.contains("INFO [fetch:stdout] fetched 3 games"), "{log}");
    assert!(log.contains("publication skipped: no push credential configured"), "{log}");
}

#[test]
fn fatal_abort_exits_non_zero() {
    let dir = TempDir::new().unwrap();
    let stages = stages_file(
        &dir,
        r#"
stages:
  - name: fetch
    command: ["sh", "-c", "echo upstream down >&2; exit 4"]
    policy: fatal
    retry_after_secs: 3600
  - name: predict
    command: ["sh", "-c", "touch predicted"]
    policy: fatal
"#,
    );

    lockbox(dir.path())
        .env("LOCKBOX_STAGES_FILE", &stages)
        .arg("--once")
        .assert()
        .code(1)
        .stdout(predicate::str::contains(r#""overall": "fatal_abort""#));

    assert!(!dir.path().join("predicted").exists());
    assert!(!dir.path().join("Output").join("last_success.json").exists());
    let log = fs::read_to_string(dir.path().join("Output").join("cycle.log")).unwrap();
    assert!(log.contains("ERROR stage 'fetch' failed (exit code 4) (policy fatal)"), "{log}");
}

#[test]
fn partial_failure_exits_zero_without_marker() {
    let dir = TempDir::new().unwrap();
    let stages = stages_file(
        &dir,
        r#"
stages:
  - name: fetch
    command: ["true"]
    policy: fatal
  - name: settle
    command: ["false"]
    policy: skip
  - name: learn
    command: ["true"]
    policy: skip
"#,
    );

    lockbox(dir.path())
        .env("LOCKBOX_STAGES_FILE", &stages)
        .arg("--once")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""overall": "partial_failure""#));

    assert!(!dir.path().join("Output").join("last_success.json").exists());
}

#[test]
fn broken_stage_table_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let stages = stages_file(&dir, "stages: [ { name: fetch");

    lockbox(dir.path())
        .env("LOCKBOX_STAGES_FILE", &stages)
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("configuration error"))
        .stderr(predicate::str::contains("stages.yaml"));
}

#[test]
fn invalid_commit_template_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let stages = stages_file(&dir, HEALTHY);

    lockbox(dir.path())
        .env("LOCKBOX_STAGES_FILE", &stages)
        .env("LOCKBOX_COMMIT_MESSAGE", "cycle {{ date")
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("commit message template"));

    assert!(!dir.path().join("Output").join("cycle.log").exists());
}

#[test]
fn invalid_trigger_time_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();

    lockbox(dir.path())
        .env("LOCKBOX_TRIGGER_AT", "25:99")
        .arg("--once")
        .assert()
        .code(2);
}
