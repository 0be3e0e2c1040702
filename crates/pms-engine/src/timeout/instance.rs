use super::tracker::TimeoutTrackerState;
use crate::adviser::RepairAction;
use serde::{Deserialize, Serialize};

/// What the engine does when a timeout instance fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeoutCallback {
    ExpireNode { node_execution_id: String },
    BeginNode { node_execution_id: String },
    RunNode { node_execution_id: String },
    CompleteWait { node_execution_id: String },
    InterventionExpired {
        node_execution_id: String,
        action: RepairAction,
    },
}

impl TimeoutCallback {
    pub fn node_execution_id(&self) -> &str {
        match self {
            TimeoutCallback::ExpireNode { node_execution_id }
            | TimeoutCallback::BeginNode { node_execution_id }
            | TimeoutCallback::RunNode { node_execution_id }
            | TimeoutCallback::CompleteWait { node_execution_id }
            | TimeoutCallback::InterventionExpired {
                node_execution_id, ..
            } => node_execution_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutInstance {
    pub uuid: String,
    pub plan_execution_id: String,
    pub node_execution_id: String,
    pub dimension: String,
    pub tracker: TimeoutTrackerState,
    pub callback: TimeoutCallback,
    pub created_at: i64,
    #[serde(default)]
    pub version: u64,
}
