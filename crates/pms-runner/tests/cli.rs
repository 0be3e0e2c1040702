use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn demo_plan() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/release.yaml")
}

fn temp_path(label: &str, extension: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be after epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("pms-cli-{label}-{nanos}.{extension}"))
}

#[test]
fn help_lists_commands() {
    Command::cargo_bin("pms-runner")
        .expect("binary must build")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn validate_prints_ok_for_demo_plan() {
    Command::cargo_bin("pms-runner")
        .expect("binary must build")
        .arg("validate")
        .arg("--plan")
        .arg(demo_plan())
        .assert()
        .success()
        .stdout(predicate::str::contains("plan is valid"));
}

#[test]
fn run_streams_events_to_stdout() {
    let inputs = temp_path("inputs", "json");
    std::fs::write(&inputs, r#"{"version": "2.0.0"}"#).expect("inputs must be writable");

    Command::cargo_bin("pms-runner")
        .expect("binary must build")
        .args(["run", "--events-jsonl", "-", "--plan"])
        .arg(demo_plan())
        .arg("--inputs")
        .arg(&inputs)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ORCHESTRATION_END\""))
        .stdout(predicate::str::contains("SUCCEEDED"));
}

#[test]
fn inspect_reports_missing_checkpoint() {
    Command::cargo_bin("pms-runner")
        .expect("binary must build")
        .args(["inspect", "--checkpoint", "/nonexistent/checkpoint.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("checkpoint load failed"));
}
