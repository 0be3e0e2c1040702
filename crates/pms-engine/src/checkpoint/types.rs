use crate::execution::{Interrupt, NodeExecution, PlanExecution};
use crate::resolver::OutputInstance;
use crate::timeout::TimeoutInstance;
use pms_core::Plan;
use serde::{Deserialize, Serialize};

pub const CHECKPOINT_SCHEMA_0_0_1: &str = "pms-checkpoint/0.0.1";

/// Everything needed to continue one plan execution in another engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionCheckpoint {
    pub schema: String,
    pub plan_execution_id: String,
    pub plan_hash: String,
    pub plan: Plan,
    pub plan_execution: PlanExecution,
    #[serde(default)]
    pub node_executions: Vec<NodeExecution>,
    #[serde(default)]
    pub interrupts: Vec<Interrupt>,
    #[serde(default)]
    pub outputs: Vec<OutputInstance>,
    #[serde(default)]
    pub timeout_instances: Vec<TimeoutInstance>,
    #[serde(default)]
    pub next_event_seq: u64,
}

impl ExecutionCheckpoint {
    pub fn new(plan: Plan, plan_execution: PlanExecution) -> Self {
        Self {
            schema: CHECKPOINT_SCHEMA_0_0_1.to_string(),
            plan_execution_id: plan_execution.uuid.clone(),
            plan_hash: plan_execution.plan_hash.clone(),
            plan,
            plan_execution,
            node_executions: Vec::new(),
            interrupts: Vec::new(),
            outputs: Vec::new(),
            timeout_instances: Vec::new(),
            next_event_seq: 0,
        }
    }

    /// Orders every collection by creation so equal states encode equally.
    pub fn normalize(&mut self) {
        self.node_executions
            .sort_by(|a, b| (a.start_ts, &a.uuid).cmp(&(b.start_ts, &b.uuid)));
        self.interrupts
            .sort_by(|a, b| (a.created_at, &a.uuid).cmp(&(b.created_at, &b.uuid)));
        self.outputs
            .sort_by(|a, b| (a.created_at, &a.uuid).cmp(&(b.created_at, &b.uuid)));
        self.timeout_instances
            .sort_by(|a, b| (a.created_at, &a.uuid).cmp(&(b.created_at, &b.uuid)));
    }
}

pub fn encode_checkpoint_json(checkpoint: &ExecutionCheckpoint) -> serde_json::Result<String> {
    serde_json::to_string_pretty(checkpoint)
}

pub fn decode_checkpoint_json(input: &str) -> serde_json::Result<ExecutionCheckpoint> {
    serde_json::from_str::<ExecutionCheckpoint>(input)
}
