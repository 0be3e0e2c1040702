//! Demo steps and the in-process task executor used by `pms-runner run`.

use crate::config::LocalTaskConfig;
use parking_lot::Mutex;
use pms_core::{FailureInfo, FailureType};
use pms_engine::{
    EngineSignal, OutputScope, ResponseData, SignalQueue, Step, StepContext, StepError, StepResponse,
    TaskExecutor, TaskExecutorError, TaskRequest,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, info};

pub const ECHO: &str = "ECHO";
pub const FAIL: &str = "FAIL";
pub const SHELL: &str = "SHELL";
pub const SHELL_TASK: &str = "shell";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EchoParameters {
    #[serde(default)]
    message: Value,
    /// Also publish the message as a pipeline-scoped sweeping output.
    #[serde(default)]
    output: Option<String>,
}

/// Succeeds with its `message` and bound inputs as the node outcome.
#[derive(Debug, Default)]
pub struct EchoStep;

impl Step for EchoStep {
    fn execute_sync(&self, ctx: &StepContext<'_>) -> Result<StepResponse, StepError> {
        let parameters = if ctx.parameters.is_null() {
            EchoParameters::default()
        } else {
            ctx.parameters_as::<EchoParameters>()?
        };
        info!(identifier = %ctx.plan_node.identifier, message = %parameters.message, "echo");
        let mut response = StepResponse::succeeded().with_outcome(
            ctx.plan_node.identifier.clone(),
            json!({"message": parameters.message, "inputs": ctx.inputs}),
        );
        if let Some(name) = parameters.output {
            response = response.with_sweeping_output(name, parameters.message, OutputScope::Pipeline);
        }
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FailParameters {
    #[serde(default = "default_fail_message")]
    message: String,
    #[serde(default = "default_failure_type")]
    failure_type: FailureType,
}

fn default_fail_message() -> String {
    "step failed on purpose".to_string()
}

fn default_failure_type() -> FailureType {
    FailureType::Application
}

/// Always fails; exercises advisers.
#[derive(Debug, Default)]
pub struct FailStep;

impl Step for FailStep {
    fn execute_sync(&self, ctx: &StepContext<'_>) -> Result<StepResponse, StepError> {
        let parameters = if ctx.parameters.is_null() {
            FailParameters {
                message: default_fail_message(),
                failure_type: default_failure_type(),
            }
        } else {
            ctx.parameters_as::<FailParameters>()?
        };
        Ok(StepResponse::failed(FailureInfo::new(
            parameters.message,
            parameters.failure_type,
        )))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShellParameters {
    command: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// Runs `command` through the task executor as a `shell` task.
#[derive(Debug, Default)]
pub struct ShellStep;

impl Step for ShellStep {
    fn obtain_task(&self, ctx: &StepContext<'_>) -> Result<TaskRequest, StepError> {
        let parameters = ctx.parameters_as::<ShellParameters>()?;
        let request = TaskRequest::new(SHELL_TASK, json!({"command": parameters.command}));
        Ok(match parameters.timeout_ms {
            Some(timeout_ms) => request.with_timeout_ms(timeout_ms),
            None => request,
        })
    }
}

/// Runs `shell` tasks on the tokio runtime and reports each result back to the
/// engine as a `StepResponse` signal.
pub struct LocalTaskExecutor {
    queue: Arc<dyn SignalQueue>,
    runtime: Handle,
    config: LocalTaskConfig,
    next_id: AtomicU64,
    dispatched: AtomicU32,
    running: Arc<Mutex<BTreeMap<String, AbortHandle>>>,
}

impl LocalTaskExecutor {
    pub fn new(queue: Arc<dyn SignalQueue>, runtime: Handle, config: LocalTaskConfig) -> Self {
        Self {
            queue,
            runtime,
            config,
            next_id: AtomicU64::new(1),
            dispatched: AtomicU32::new(0),
            running: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn running(&self) -> Vec<String> {
        self.running.lock().keys().cloned().collect()
    }

    fn command(request: &TaskRequest) -> Result<String, TaskExecutorError> {
        if request.task_type != SHELL_TASK {
            return Err(TaskExecutorError::Unsupported {
                task_type: request.task_type.clone(),
            });
        }
        request
            .parameters
            .get("command")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TaskExecutorError::Dispatch {
                reason: "shell task requires a string `command` parameter".to_string(),
            })
    }

    /// True when this dispatch should fail by injection.
    fn inject_failure(&self) -> bool {
        self.dispatched.fetch_add(1, Ordering::SeqCst) < self.config.fail_first
    }

    fn release(&self, task_id: &str) -> Result<(), TaskExecutorError> {
        let handle = self
            .running
            .lock()
            .remove(task_id)
            .ok_or_else(|| TaskExecutorError::UnknownTask {
                task_id: task_id.to_string(),
            })?;
        handle.abort();
        Ok(())
    }
}

impl TaskExecutor for LocalTaskExecutor {
    fn queue_task(
        &self,
        _setup_abstractions: &BTreeMap<String, String>,
        request: &TaskRequest,
        _hold_for_ms: u64,
    ) -> Result<String, TaskExecutorError> {
        let command = Self::command(request)?;
        let task_id = format!("local-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let inject_failure = self.inject_failure();
        let latency = Duration::from_millis(self.config.latency_ms);
        let timeout = request.timeout_ms.map(Duration::from_millis);
        let correlation_id = request.correlation_id.clone();
        let queue = self.queue.clone();
        let running = self.running.clone();
        let id = task_id.clone();

        // Hold the lock across spawn so a fast task cannot finish before it is tracked.
        let mut tracked = self.running.lock();
        let handle = self.runtime.spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let response = if inject_failure {
                ResponseData::error("injected task failure")
            } else {
                run_shell(&command, timeout).await
            };
            running.lock().remove(&id);
            debug!(task_id = %id, success = response.is_success(), "local task finished");
            queue.push(EngineSignal::StepResponse {
                correlation_id,
                response,
            });
        });
        tracked.insert(task_id.clone(), handle.abort_handle());
        debug!(task_id = %task_id, "local task queued");
        Ok(task_id)
    }

    fn expire_task(&self, task_id: &str) -> Result<(), TaskExecutorError> {
        self.release(task_id)
    }

    fn abort_task(&self, task_id: &str) -> Result<(), TaskExecutorError> {
        self.release(task_id)
    }

    fn execute_task(
        &self,
        _setup_abstractions: &BTreeMap<String, String>,
        request: &TaskRequest,
    ) -> Result<ResponseData, TaskExecutorError> {
        let command = Self::command(request)?;
        if self.inject_failure() {
            return Ok(ResponseData::error("injected task failure"));
        }
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .map_err(|error| TaskExecutorError::Dispatch {
                reason: error.to_string(),
            })?;
        Ok(shell_response(output))
    }
}

async fn run_shell(command: &str, timeout: Option<Duration>) -> ResponseData {
    let mut child = tokio::process::Command::new("sh");
    child.arg("-c").arg(command).kill_on_drop(true);
    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.output()).await {
            Ok(output) => output,
            Err(_) => {
                return ResponseData::Error {
                    message: format!("command timed out after {}ms", limit.as_millis()),
                    failure_types: BTreeSet::from([FailureType::Timeout]),
                }
            }
        },
        None => child.output().await,
    };
    match output {
        Ok(output) => shell_response(output),
        Err(error) => ResponseData::Error {
            message: format!("command could not start: {error}"),
            failure_types: BTreeSet::from([FailureType::Connectivity]),
        },
    }
}

fn shell_response(output: std::process::Output) -> ResponseData {
    let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    if output.status.success() {
        return ResponseData::success(json!({"exit_code": 0, "stdout": stdout}));
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
    let code = output
        .status
        .code()
        .map(|code| code.to_string())
        .unwrap_or_else(|| "signal".to_string());
    ResponseData::error(format!("command exited with {code}: {stderr}"))
}

#[cfg(test)]
#[path = "steps_test.rs"]
mod tests;
