use super::types::{ExecutionMode, Facilitator, FacilitatorResponse};
use pms_core::Ambiance;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

pub const SYNC: &str = "SYNC";
pub const ASYNC: &str = "ASYNC";
pub const CHILD: &str = "CHILD";
pub const CHILDREN: &str = "CHILDREN";
pub const TASK: &str = "TASK";
pub const TASK_CHAIN: &str = "TASK_CHAIN";
pub const WAIT: &str = "WAIT";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct WaitParameters {
    #[serde(default)]
    wait_duration_ms: u64,
}

/// Reads the optional initial wait; malformed parameters make the facilitator decline.
fn initial_wait(facilitator: &str, parameters: &Value) -> Option<u64> {
    if parameters.is_null() {
        return Some(0);
    }
    match serde_json::from_value::<WaitParameters>(parameters.clone()) {
        Ok(parsed) => Some(parsed.wait_duration_ms),
        Err(error) => {
            warn!(facilitator, error = %error, "facilitator parameters rejected");
            None
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SyncFacilitator;

impl Facilitator for SyncFacilitator {
    fn facilitate(&self, _: &Ambiance, _: &Value, _: &Value) -> Option<FacilitatorResponse> {
        Some(FacilitatorResponse::immediate(ExecutionMode::Sync))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ChildFacilitator;

impl Facilitator for ChildFacilitator {
    fn facilitate(&self, _: &Ambiance, _: &Value, _: &Value) -> Option<FacilitatorResponse> {
        Some(FacilitatorResponse::immediate(ExecutionMode::Child))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ChildrenFacilitator;

impl Facilitator for ChildrenFacilitator {
    fn facilitate(&self, _: &Ambiance, _: &Value, _: &Value) -> Option<FacilitatorResponse> {
        Some(FacilitatorResponse::immediate(ExecutionMode::Children))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WaitFacilitator;

impl Facilitator for WaitFacilitator {
    fn facilitate(&self, _: &Ambiance, _: &Value, _: &Value) -> Option<FacilitatorResponse> {
        Some(FacilitatorResponse::immediate(ExecutionMode::Wait))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AsyncFacilitator;

impl Facilitator for AsyncFacilitator {
    fn facilitate(&self, _: &Ambiance, _: &Value, parameters: &Value) -> Option<FacilitatorResponse> {
        Some(FacilitatorResponse {
            execution_mode: ExecutionMode::Async,
            initial_wait_ms: initial_wait(ASYNC, parameters)?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TaskFacilitator;

impl Facilitator for TaskFacilitator {
    fn facilitate(&self, _: &Ambiance, _: &Value, parameters: &Value) -> Option<FacilitatorResponse> {
        Some(FacilitatorResponse {
            execution_mode: ExecutionMode::Task,
            initial_wait_ms: initial_wait(TASK, parameters)?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TaskChainFacilitator;

impl Facilitator for TaskChainFacilitator {
    fn facilitate(&self, _: &Ambiance, _: &Value, parameters: &Value) -> Option<FacilitatorResponse> {
        Some(FacilitatorResponse {
            execution_mode: ExecutionMode::TaskChain,
            initial_wait_ms: initial_wait(TASK_CHAIN, parameters)?,
        })
    }
}

#[cfg(test)]
#[path = "builtin_test.rs"]
mod tests;
