use pms_core::{IssuePath, PlanIssue};
use pms_engine::{DispatcherOptions, EngineConfig, RedactMode, RedactOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const RUNNER_CONFIG_SCHEMA_0_0_1: &str = "pms-runner/0.0.1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    #[serde(default = "default_runner_schema")]
    pub schema: String,
    #[serde(default)]
    pub engine: RunnerEngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tasks: LocalTaskConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            schema: default_runner_schema(),
            engine: RunnerEngineConfig::default(),
            logging: LoggingConfig::default(),
            tasks: LocalTaskConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerEngineConfig {
    #[serde(flatten)]
    pub engine: EngineConfig,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_timeout_poll_interval_ms")]
    pub timeout_poll_interval_ms: u64,
    /// Upper bound on one `run`; the execution is aborted when it is reached.
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
}

impl Default for RunnerEngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            workers: default_workers(),
            timeout_poll_interval_ms: default_timeout_poll_interval_ms(),
            run_timeout_ms: default_run_timeout_ms(),
        }
    }
}

impl RunnerEngineConfig {
    pub fn dispatcher_options(&self) -> DispatcherOptions {
        DispatcherOptions {
            workers: self.workers,
            timeout_poll_interval_ms: self.timeout_poll_interval_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTaskConfig {
    /// Delay added before every task starts.
    #[serde(default)]
    pub latency_ms: u64,
    /// The first `fail_first` tasks fail without running.
    #[serde(default)]
    pub fail_first: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default)]
    pub redact_mode: RedactMode,
    #[serde(default)]
    pub allow_paths: Vec<String>,
}

impl EventsConfig {
    pub fn redact_options(&self) -> RedactOptions {
        RedactOptions {
            mode: self.redact_mode,
            allow_path_patterns: self.allow_paths.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerConfigError {
    #[error("read runner config failed `{path}`: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("runner config parse failed: {0}")]
    Parse(String),
    #[error("runner config validation failed: {}", render_issues(.0))]
    Validation(Vec<PlanIssue>),
}

pub fn load_runner_config(path: &Path) -> Result<RunnerConfig, RunnerConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| RunnerConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    let expanded = expand_env_placeholders(&raw).map_err(RunnerConfigError::Parse)?;
    let config: RunnerConfig = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&expanded)
            .map_err(|error| RunnerConfigError::Parse(format!("json decode error: {error}")))?,
        Some("yaml") | Some("yml") => serde_yaml::from_str(&expanded)
            .map_err(|error| RunnerConfigError::Parse(format!("yaml decode error: {error}")))?,
        _ => serde_yaml::from_str(&expanded)
            .or_else(|_| serde_json::from_str(&expanded))
            .map_err(|error| RunnerConfigError::Parse(error.to_string()))?,
    };

    let mut issues = validate_runner_config(&config);
    PlanIssue::sort_stable(&mut issues);
    if !issues.is_empty() {
        return Err(RunnerConfigError::Validation(issues));
    }
    Ok(config)
}

pub fn validate_runner_config(config: &RunnerConfig) -> Vec<PlanIssue> {
    let mut issues = Vec::new();
    if config.schema != RUNNER_CONFIG_SCHEMA_0_0_1 {
        issues.push(PlanIssue::error(
            "runner.config.schema",
            IssuePath::root().key("schema"),
            format!(
                "unsupported runner config schema `{}` (expected `{RUNNER_CONFIG_SCHEMA_0_0_1}`)",
                config.schema
            ),
        ));
    }
    let engine = IssuePath::root().key("engine");
    if config.engine.workers == 0 {
        issues.push(PlanIssue::error(
            "runner.config.engine.workers",
            engine.clone().key("workers"),
            "engine.workers must be > 0",
        ));
    }
    if config.engine.timeout_poll_interval_ms == 0 {
        issues.push(PlanIssue::error(
            "runner.config.engine.timeout_poll_interval",
            engine.clone().key("timeout_poll_interval_ms"),
            "engine.timeout_poll_interval_ms must be > 0",
        ));
    }
    if config.engine.run_timeout_ms == 0 {
        issues.push(PlanIssue::error(
            "runner.config.engine.run_timeout",
            engine.clone().key("run_timeout_ms"),
            "engine.run_timeout_ms must be > 0",
        ));
    }
    if config.engine.engine.cas_retry_limit == 0 {
        issues.push(PlanIssue::error(
            "runner.config.engine.cas_retry_limit",
            engine.clone().key("cas_retry_limit"),
            "engine.cas_retry_limit must be > 0",
        ));
    }
    if config.engine.engine.default_children_concurrency == Some(0) {
        issues.push(PlanIssue::error(
            "runner.config.engine.default_children_concurrency",
            engine.key("default_children_concurrency"),
            "engine.default_children_concurrency must be > 0 when set",
        ));
    }
    for (index, pattern) in config.events.allow_paths.iter().enumerate() {
        if pattern.trim().is_empty() || pattern.split('.').any(str::is_empty) {
            issues.push(PlanIssue::error(
                "runner.config.events.allow_path",
                IssuePath::root().key("events").key("allow_paths").index(index),
                format!("allow path `{pattern}` has an empty segment"),
            ));
        }
    }
    issues
}

pub(crate) fn render_issues(issues: &[PlanIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn default_runner_schema() -> String {
    RUNNER_CONFIG_SCHEMA_0_0_1.to_string()
}

fn default_workers() -> usize {
    DispatcherOptions::default().workers
}

fn default_timeout_poll_interval_ms() -> u64 {
    DispatcherOptions::default().timeout_poll_interval_ms
}

fn default_run_timeout_ms() -> u64 {
    300_000
}

fn default_log_filter() -> String {
    "warn,pms_engine=info,pms_runner=info".to_string()
}

fn expand_env_placeholders(input: &str) -> Result<String, String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err("unterminated env placeholder `${...`".to_string());
        };
        let key = &after[..end];
        if key.is_empty() {
            return Err("empty env placeholder `${}`".to_string());
        }
        let value =
            std::env::var(key).map_err(|_| format!("missing env var for placeholder `${{{key}}}`"))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
