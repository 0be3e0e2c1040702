use super::{load_runner_config, validate_runner_config, RunnerConfig, RunnerConfigError};
use pms_engine::{MatchPolicy, RedactMode};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn write_temp_file(label: &str, extension: &str, content: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be after epoch")
        .as_nanos();
    let path = std::env::temp_dir().join(format!("pms-{label}-{nanos}.{extension}"));
    fs::write(&path, content).expect("temp file must be writable");
    path
}

#[test]
fn load_runner_config_parses_yaml_sections() {
    let path = write_temp_file(
        "runner-config-ok",
        "yaml",
        r#"
schema: pms-runner/0.0.1
engine:
  match_policy: exactly_one
  default_children_concurrency: 2
  workers: 3
  timeout_poll_interval_ms: 10
logging:
  filter: debug
tasks:
  latency_ms: 5
  fail_first: 1
events:
  redact_mode: off
  allow_paths: ["data.token"]
"#,
    );

    let config = load_runner_config(&path).expect("config must load");
    assert_eq!(config.engine.engine.match_policy, MatchPolicy::ExactlyOne);
    assert_eq!(config.engine.engine.default_children_concurrency, Some(2));
    assert_eq!(config.engine.engine.cas_retry_limit, 16);
    assert_eq!(config.engine.dispatcher_options().workers, 3);
    assert_eq!(config.logging.filter, "debug");
    assert_eq!(config.tasks.fail_first, 1);
    assert_eq!(config.events.redact_options().mode, RedactMode::Off);
}

#[test]
fn load_runner_config_expands_env_placeholders() {
    std::env::set_var("PMS_TEST_WORKERS", "7");
    let path = write_temp_file(
        "runner-config-env",
        "json",
        r#"{"schema": "pms-runner/0.0.1", "engine": {"workers": ${PMS_TEST_WORKERS}}}"#,
    );

    let config = load_runner_config(&path).expect("config must load");
    assert_eq!(config.engine.workers, 7);
}

#[test]
fn load_runner_config_reports_missing_env_var() {
    let path = write_temp_file(
        "runner-config-missing-env",
        "yaml",
        "schema: ${PMS_TEST_DEFINITELY_UNSET}\n",
    );

    let error = load_runner_config(&path).expect_err("missing env var must fail");
    match error {
        RunnerConfigError::Parse(message) => assert!(message.contains("PMS_TEST_DEFINITELY_UNSET")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn load_runner_config_collects_sorted_issues() {
    let path = write_temp_file(
        "runner-config-invalid",
        "yaml",
        r#"
schema: pms-runner/9.9.9
engine:
  workers: 0
  run_timeout_ms: 0
"#,
    );

    let error = load_runner_config(&path).expect_err("invalid config must fail");
    let RunnerConfigError::Validation(issues) = error else {
        panic!("expected validation error");
    };
    let kinds = issues.iter().map(|issue| issue.kind.as_str()).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            "runner.config.engine.run_timeout",
            "runner.config.engine.workers",
            "runner.config.schema",
        ]
    );
}

#[test]
fn load_runner_config_rejects_unknown_sections() {
    let path = write_temp_file("runner-config-unknown", "yaml", "schema: pms-runner/0.0.1\nchains: {}\n");
    let error = load_runner_config(&path).expect_err("unknown section must fail");
    assert!(matches!(error, RunnerConfigError::Parse(_)));
}

#[test]
fn default_config_is_valid() {
    assert!(validate_runner_config(&RunnerConfig::default()).is_empty());
}

#[test]
fn load_runner_config_reports_unreadable_file() {
    let error = load_runner_config(std::path::Path::new("/nonexistent/pms-runner.yaml"))
        .expect_err("missing file must fail");
    assert!(matches!(error, RunnerConfigError::ReadFile { .. }));
}
