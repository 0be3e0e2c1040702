use pms_core::{FailureInfo, FailureType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_type: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Filled by the engine at dispatch; the executor echoes it back with the response.
    #[serde(default)]
    pub correlation_id: String,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
            timeout_ms: None,
            correlation_id: String::new(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseData {
    Success {
        #[serde(default)]
        payload: Value,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
        failure_types: BTreeSet<FailureType>,
    },
}

impl ResponseData {
    pub fn success(payload: Value) -> Self {
        ResponseData::Success { payload }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ResponseData::Error {
            message: message.into(),
            failure_types: BTreeSet::from([FailureType::Application]),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseData::Success { .. })
    }

    pub fn failure_info(&self) -> Option<FailureInfo> {
        match self {
            ResponseData::Success { .. } => None,
            ResponseData::Error {
                message,
                failure_types,
            } => Some(FailureInfo {
                message: message.clone(),
                failure_types: if failure_types.is_empty() {
                    BTreeSet::from([FailureType::Unknown])
                } else {
                    failure_types.clone()
                },
                code: None,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskExecutorError {
    #[error("task dispatch failed: {reason}")]
    Dispatch { reason: String },
    #[error("task type `{task_type}` is not supported by this executor")]
    Unsupported { task_type: String },
    #[error("task `{task_id}` is unknown")]
    UnknownTask { task_id: String },
}

/// Narrow seam to the delegate/agent subsystem that runs tasks out of process.
pub trait TaskExecutor: Send + Sync {
    /// Queues a task and returns its task id. The eventual response is delivered to
    /// the engine keyed by `request.correlation_id`.
    fn queue_task(
        &self,
        setup_abstractions: &BTreeMap<String, String>,
        request: &TaskRequest,
        hold_for_ms: u64,
    ) -> Result<String, TaskExecutorError>;

    fn expire_task(&self, task_id: &str) -> Result<(), TaskExecutorError>;

    fn abort_task(&self, task_id: &str) -> Result<(), TaskExecutorError>;

    fn execute_task(
        &self,
        setup_abstractions: &BTreeMap<String, String>,
        request: &TaskRequest,
    ) -> Result<ResponseData, TaskExecutorError>;
}

/// Executor for engines that never dispatch tasks; every call is rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingTaskExecutor;

impl TaskExecutor for RejectingTaskExecutor {
    fn queue_task(
        &self,
        _setup_abstractions: &BTreeMap<String, String>,
        request: &TaskRequest,
        _hold_for_ms: u64,
    ) -> Result<String, TaskExecutorError> {
        Err(TaskExecutorError::Unsupported {
            task_type: request.task_type.clone(),
        })
    }

    fn expire_task(&self, task_id: &str) -> Result<(), TaskExecutorError> {
        Err(TaskExecutorError::UnknownTask {
            task_id: task_id.to_string(),
        })
    }

    fn abort_task(&self, task_id: &str) -> Result<(), TaskExecutorError> {
        Err(TaskExecutorError::UnknownTask {
            task_id: task_id.to_string(),
        })
    }

    fn execute_task(
        &self,
        _setup_abstractions: &BTreeMap<String, String>,
        request: &TaskRequest,
    ) -> Result<ResponseData, TaskExecutorError> {
        Err(TaskExecutorError::Unsupported {
            task_type: request.task_type.clone(),
        })
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
