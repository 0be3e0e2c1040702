use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ORCHESTRATION_EVENT_SCHEMA_0_0_1: &str = "pms-orchestration-event/0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationEventType {
    OrchestrationStart,
    OrchestrationEnd,
    NodeExecutionStart,
    NodeExecutionStatusUpdate,
    NodeExecutionEnd,
    FacilitatorResponse,
    AdviserResponse,
    InterruptRegistered,
    InterruptProcessed,
    TimeoutExpired,
    OutputPublished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestrationEvent {
    #[serde(rename = "type")]
    pub event_type: OrchestrationEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl OrchestrationEvent {
    pub fn new(event_type: OrchestrationEventType) -> Self {
        Self {
            event_type,
            node_execution_id: None,
            data: Map::new(),
        }
    }

    pub fn for_node(mut self, node_execution_id: impl Into<String>) -> Self {
        self.node_execution_id = Some(node_execution_id.into());
        self
    }

    /// Attaches a data field; values that fail to serialize are stored as null.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        self.data.insert(
            key.to_string(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestrationEventRecord {
    pub schema: String,
    pub plan_execution_id: String,
    pub seq: u64,
    pub ts: String,
    pub event: OrchestrationEvent,
}

impl OrchestrationEventRecord {
    pub fn new(
        plan_execution_id: impl Into<String>,
        seq: u64,
        ts: impl Into<String>,
        event: OrchestrationEvent,
    ) -> Self {
        Self {
            schema: ORCHESTRATION_EVENT_SCHEMA_0_0_1.to_string(),
            plan_execution_id: plan_execution_id.into(),
            seq,
            ts: ts.into(),
            event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventSequenceError {
    #[error("event sequence is empty")]
    Empty,
    #[error("event sequence must start at 0, got {actual}")]
    InvalidStart { actual: u64 },
    #[error("records at index {index} belong to `{actual}`, expected `{expected}`")]
    MixedExecutions {
        index: usize,
        expected: String,
        actual: String,
    },
    #[error("event sequence has a gap at index {index}: expected {expected}, got {actual}")]
    NonMonotonic {
        index: usize,
        expected: u64,
        actual: u64,
    },
}

/// Checks that the records of one execution are numbered 0, 1, 2, ... with no gaps.
pub fn ensure_monotonic_sequence(records: &[OrchestrationEventRecord]) -> Result<(), EventSequenceError> {
    let Some(first) = records.first() else {
        return Err(EventSequenceError::Empty);
    };
    if first.seq != 0 {
        return Err(EventSequenceError::InvalidStart { actual: first.seq });
    }
    for (index, pair) in records.windows(2).enumerate() {
        let index = index + 1;
        if pair[1].plan_execution_id != first.plan_execution_id {
            return Err(EventSequenceError::MixedExecutions {
                index,
                expected: first.plan_execution_id.clone(),
                actual: pair[1].plan_execution_id.clone(),
            });
        }
        let expected = pair[0].seq + 1;
        if pair[1].seq != expected {
            return Err(EventSequenceError::NonMonotonic {
                index,
                expected,
                actual: pair[1].seq,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
