use pms_core::Ambiance;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Sync,
    Async,
    Child,
    Children,
    Task,
    TaskChain,
    Wait,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Sync => "SYNC",
            ExecutionMode::Async => "ASYNC",
            ExecutionMode::Child => "CHILD",
            ExecutionMode::Children => "CHILDREN",
            ExecutionMode::Task => "TASK",
            ExecutionMode::TaskChain => "TASK_CHAIN",
            ExecutionMode::Wait => "WAIT",
        }
    }
}

impl Display for ExecutionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilitatorResponse {
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub initial_wait_ms: u64,
}

impl FacilitatorResponse {
    pub fn immediate(execution_mode: ExecutionMode) -> Self {
        Self {
            execution_mode,
            initial_wait_ms: 0,
        }
    }
}

/// Chooses how a node runs. `None` declines and lets the next obtainment decide.
pub trait Facilitator: Send + Sync {
    fn facilitate(
        &self,
        ambiance: &Ambiance,
        step_parameters: &Value,
        parameters: &Value,
    ) -> Option<FacilitatorResponse>;
}
