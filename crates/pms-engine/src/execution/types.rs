use crate::adviser::{AdviseType, AdviserResponse};
use crate::engine::EngineSignal;
use crate::facilitator::ExecutionMode;
use crate::step::StepResponse;
use crate::task::ResponseData;
use pms_core::{Ambiance, FailureInfo, Status, StepType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecution {
    pub uuid: String,
    pub plan_id: String,
    pub plan_hash: String,
    pub status: Status,
    pub start_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<i64>,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub setup_abstractions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    /// Signals held back while the execution is paused; replayed on resume.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deferred_signals: Vec<EngineSignal>,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitKind {
    Async,
    Task,
    TaskChain,
    /// Step-requested wait; completed by a timer rather than a response.
    Timed,
}

/// Bookkeeping of a node parked in ASYNC_WAITING, TASK_WAITING or a step-requested TIMED_WAITING.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitState {
    pub kind: WaitKind,
    pub correlation_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub responses: BTreeMap<String, ResponseData>,
    #[serde(default)]
    pub pass_through: Value,
    #[serde(default)]
    pub chain_end: bool,
}

impl WaitState {
    pub fn new(kind: WaitKind, correlation_ids: Vec<String>) -> Self {
        Self {
            kind,
            correlation_ids,
            task_ids: Vec::new(),
            responses: BTreeMap::new(),
            pass_through: Value::Null,
            chain_end: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.correlation_ids
            .iter()
            .all(|correlation_id| self.responses.contains_key(correlation_id))
    }
}

/// Fan-in counter of a CHILD/CHILDREN node. `pending` counts chains not yet ended,
/// including the ones still `queued` behind the concurrency limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildrenState {
    pub pending: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queued: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub uuid: String,
    pub plan_execution_id: String,
    pub plan_node_id: String,
    pub identifier: String,
    pub ambiance: Ambiance,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<String>,
    pub start_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adviser_response: Option<AdviserResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeout_instance_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_ids: Vec<String>,
    #[serde(default)]
    pub old_retry: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interrupt_history: Vec<InterruptEffect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<WaitState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<ChildrenState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_from: Option<Status>,
    /// Step status held while the node sits in INTERVENTION_WAITING.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_status: Option<Status>,
    /// Step response that arrived while the node was paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_response: Option<StepResponse>,
    #[serde(default)]
    pub version: u64,
}

impl NodeExecution {
    pub fn retry_count(&self) -> usize {
        self.retry_ids.len()
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn previous_advise_type(&self) -> Option<AdviseType> {
        self.adviser_response.as_ref().map(AdviserResponse::advise_type)
    }

    pub fn was_intervened(&self) -> bool {
        self.previous_advise_type() == Some(AdviseType::InterventionWait)
            || self.interrupt_history.iter().any(|effect| {
                matches!(
                    effect.interrupt_type,
                    InterruptType::Retry
                        | InterruptType::Ignore
                        | InterruptType::MarkSuccess
                        | InterruptType::MarkFailed
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptType {
    Abort,
    Pause,
    Resume,
    Retry,
    Ignore,
    MarkSuccess,
    MarkFailed,
    Expire,
}

impl InterruptType {
    pub fn as_str(self) -> &'static str {
        match self {
            InterruptType::Abort => "ABORT",
            InterruptType::Pause => "PAUSE",
            InterruptType::Resume => "RESUME",
            InterruptType::Retry => "RETRY",
            InterruptType::Ignore => "IGNORE",
            InterruptType::MarkSuccess => "MARK_SUCCESS",
            InterruptType::MarkFailed => "MARK_FAILED",
            InterruptType::Expire => "EXPIRE",
        }
    }

    /// Interrupts that decide the fate of a node parked in INTERVENTION_WAITING.
    pub fn requires_intervention(self) -> bool {
        matches!(
            self,
            InterruptType::Retry
                | InterruptType::Ignore
                | InterruptType::MarkSuccess
                | InterruptType::MarkFailed
        )
    }
}

impl Display for InterruptType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptEffect {
    pub interrupt_id: String,
    pub interrupt_type: InterruptType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_status: Option<Status>,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub uuid: String,
    pub interrupt_type: InterruptType,
    pub plan_execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: i64,
    #[serde(default)]
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<InterruptEffect>,
    #[serde(default)]
    pub version: u64,
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
