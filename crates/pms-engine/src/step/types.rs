use crate::facilitator::ExecutionMode;
use crate::resolver::OutputScope;
use crate::task::{ResponseData, TaskRequest};
use pms_core::{calculate_status, Ambiance, FailureInfo, FailureType, PlanNode, Status};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What a step sees when the engine calls it.
#[derive(Debug, Clone)]
pub struct StepContext<'a> {
    pub ambiance: &'a Ambiance,
    pub plan_node: &'a PlanNode,
    /// Step parameters with every expression already evaluated.
    pub parameters: Value,
    /// Values bound through the node's ref objects, keyed by input name.
    pub inputs: BTreeMap<String, Value>,
}

impl StepContext<'_> {
    pub fn parameters_as<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        serde_json::from_value(self.parameters.clone()).map_err(|error| StepError::InvalidParameters {
            reason: error.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub scope: OutputScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<StepOutput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sweeping_outputs: Vec<StepOutput>,
}

impl StepResponse {
    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            failure_info: None,
            outcomes: Vec::new(),
            sweeping_outputs: Vec::new(),
        }
    }

    pub fn succeeded() -> Self {
        Self::with_status(Status::Succeeded)
    }

    pub fn failed(failure_info: FailureInfo) -> Self {
        Self::with_status(Status::Failed).with_failure(failure_info)
    }

    pub fn errored(failure_info: FailureInfo) -> Self {
        Self::with_status(Status::Errored).with_failure(failure_info)
    }

    pub fn with_failure(mut self, failure_info: FailureInfo) -> Self {
        self.failure_info = Some(failure_info);
        self
    }

    pub fn with_outcome(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outcomes.push(StepOutput {
            name: name.into(),
            value,
            scope: OutputScope::Step,
        });
        self
    }

    pub fn with_sweeping_output(mut self, name: impl Into<String>, value: Value, scope: OutputScope) -> Self {
        self.sweeping_outputs.push(StepOutput {
            name: name.into(),
            value,
            scope,
        });
        self
    }

    /// Default translation of a task or callback response.
    pub fn from_response_data(identifier: &str, response: &ResponseData) -> Self {
        match response {
            ResponseData::Success { payload } if payload.is_null() => Self::succeeded(),
            ResponseData::Success { payload } => Self::succeeded().with_outcome(identifier, payload.clone()),
            ResponseData::Error { .. } => {
                let failure = response
                    .failure_info()
                    .unwrap_or_else(|| FailureInfo::new("task failed", FailureType::Unknown));
                Self::failed(failure)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncExecutableResponse {
    pub callback_ids: Vec<String>,
}

/// One link of a task chain. The response to the last link (`chain_end`) finalizes the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskChainLink {
    pub task_request: TaskRequest,
    #[serde(default)]
    pub chain_end: bool,
    #[serde(default)]
    pub pass_through: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildExecutableResponse {
    pub child_node_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildrenExecutableResponse {
    pub children: Vec<String>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitStepResponse {
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildOutcome {
    pub node_execution_id: String,
    pub plan_node_id: String,
    pub identifier: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("step does not support execution mode {mode}")]
    Unsupported { mode: ExecutionMode },
    #[error("step parameters are invalid: {reason}")]
    InvalidParameters { reason: String },
    #[error("step execution failed: {}", failure.message)]
    Execution { failure: FailureInfo },
}

impl StepError {
    /// Converts the error into the synthetic response routed through advisers.
    pub fn into_response(self) -> StepResponse {
        match self {
            StepError::Unsupported { .. } | StepError::InvalidParameters { .. } => StepResponse::errored(
                FailureInfo::new(self.to_string(), FailureType::Configuration),
            ),
            StepError::Execution { failure } => StepResponse::failed(failure),
        }
    }
}

/// Rolls child outcomes into the response of their parent.
pub fn aggregate_child_outcomes(outcomes: &[ChildOutcome]) -> StepResponse {
    if outcomes.is_empty() {
        return StepResponse::succeeded();
    }
    let status = calculate_status(outcomes.iter().map(|outcome| outcome.status));
    let mut response = StepResponse::with_status(status);
    if status.is_broken() || status == Status::Aborted {
        let failure = outcomes
            .iter()
            .find(|outcome| outcome.status == status)
            .map(|outcome| {
                outcome.failure_info.clone().unwrap_or_else(|| {
                    FailureInfo::new(
                        format!("child `{}` ended {}", outcome.identifier, outcome.status),
                        FailureType::Unknown,
                    )
                })
            });
        response.failure_info = failure;
    }
    response
}

/// A step implementation. Each method is one execution mode capability; modes a step
/// does not implement report `StepError::Unsupported`.
pub trait Step: Send + Sync {
    fn execute_sync(&self, _ctx: &StepContext<'_>) -> Result<StepResponse, StepError> {
        Err(StepError::Unsupported {
            mode: ExecutionMode::Sync,
        })
    }

    fn execute_async(&self, _ctx: &StepContext<'_>) -> Result<AsyncExecutableResponse, StepError> {
        Err(StepError::Unsupported {
            mode: ExecutionMode::Async,
        })
    }

    fn handle_async_response(
        &self,
        ctx: &StepContext<'_>,
        responses: &BTreeMap<String, ResponseData>,
    ) -> Result<StepResponse, StepError> {
        let failed = responses.values().find(|response| !response.is_success());
        Ok(match failed {
            Some(response) => StepResponse::from_response_data(&ctx.plan_node.identifier, response),
            None => StepResponse::succeeded(),
        })
    }

    fn obtain_task(&self, _ctx: &StepContext<'_>) -> Result<TaskRequest, StepError> {
        Err(StepError::Unsupported {
            mode: ExecutionMode::Task,
        })
    }

    fn handle_task_result(
        &self,
        ctx: &StepContext<'_>,
        response: &ResponseData,
    ) -> Result<StepResponse, StepError> {
        Ok(StepResponse::from_response_data(&ctx.plan_node.identifier, response))
    }

    fn start_chain(&self, _ctx: &StepContext<'_>) -> Result<TaskChainLink, StepError> {
        Err(StepError::Unsupported {
            mode: ExecutionMode::TaskChain,
        })
    }

    fn next_chain_link(
        &self,
        _ctx: &StepContext<'_>,
        _response: &ResponseData,
        _pass_through: &Value,
    ) -> Result<TaskChainLink, StepError> {
        Err(StepError::Unsupported {
            mode: ExecutionMode::TaskChain,
        })
    }

    fn finalize_chain(
        &self,
        ctx: &StepContext<'_>,
        response: &ResponseData,
        _pass_through: &Value,
    ) -> Result<StepResponse, StepError> {
        Ok(StepResponse::from_response_data(&ctx.plan_node.identifier, response))
    }

    fn obtain_child(&self, _ctx: &StepContext<'_>) -> Result<ChildExecutableResponse, StepError> {
        Err(StepError::Unsupported {
            mode: ExecutionMode::Child,
        })
    }

    fn obtain_children(&self, _ctx: &StepContext<'_>) -> Result<ChildrenExecutableResponse, StepError> {
        Err(StepError::Unsupported {
            mode: ExecutionMode::Children,
        })
    }

    /// Called once every child chain of a CHILD or CHILDREN node has ended.
    fn handle_children_response(
        &self,
        _ctx: &StepContext<'_>,
        outcomes: &[ChildOutcome],
    ) -> Result<StepResponse, StepError> {
        Ok(aggregate_child_outcomes(outcomes))
    }

    fn obtain_wait(&self, _ctx: &StepContext<'_>) -> Result<WaitStepResponse, StepError> {
        Err(StepError::Unsupported {
            mode: ExecutionMode::Wait,
        })
    }

    fn finish_wait(&self, _ctx: &StepContext<'_>) -> Result<StepResponse, StepError> {
        Ok(StepResponse::succeeded())
    }

    fn handle_abort(&self, _ambiance: &Ambiance, _plan_node: &PlanNode) {}
}
