use super::error::EngineError;
use super::orchestration::OrchestrationEngine;
use crate::execution::{NodeExecution, PlanExecution};
use crate::facilitator::ExecutionMode;
use pms_core::{FailureInfo, Status};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node_execution_id: String,
    pub plan_node_id: String,
    pub identifier: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    /// This attempt is itself a retry of an earlier one.
    pub retried: bool,
    pub intervened: bool,
    /// A later attempt superseded this one.
    pub old_retry: bool,
}

impl From<&NodeExecution> for NodeSummary {
    fn from(node: &NodeExecution) -> Self {
        Self {
            node_execution_id: node.uuid.clone(),
            plan_node_id: node.plan_node_id.clone(),
            identifier: node.identifier.clone(),
            status: node.status,
            mode: node.mode,
            parent_id: node.parent_id.clone(),
            failure_info: node.failure_info.clone(),
            retried: node.retry_count() > 0,
            intervened: node.was_intervened(),
            old_retry: node.old_retry,
        }
    }
}

/// User-facing view of one execution: its status plus every node attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub plan_execution_id: String,
    pub plan_id: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    pub nodes: Vec<NodeSummary>,
}

impl ExecutionSummary {
    pub fn from_parts(execution: &PlanExecution, nodes: &[NodeExecution]) -> Self {
        Self {
            plan_execution_id: execution.uuid.clone(),
            plan_id: execution.plan_id.clone(),
            status: execution.status,
            failure_info: execution.failure_info.clone(),
            nodes: nodes.iter().map(NodeSummary::from).collect(),
        }
    }

    /// Attempts of the node with the given identifier, oldest first.
    pub fn attempts(&self, identifier: &str) -> Vec<&NodeSummary> {
        self.nodes
            .iter()
            .filter(|node| node.identifier == identifier)
            .collect()
    }

    /// The latest attempt of the node with the given identifier.
    pub fn node(&self, identifier: &str) -> Option<&NodeSummary> {
        self.nodes
            .iter()
            .filter(|node| node.identifier == identifier && !node.old_retry)
            .last()
    }

    pub fn render_text(&self) -> String {
        let mut out = format!("execution {} {}\n", self.plan_execution_id, self.status);
        if let Some(failure) = &self.failure_info {
            out.push_str(&format!("  failure: {}\n", failure.message));
        }
        for node in &self.nodes {
            let mut flags = Vec::new();
            if node.retried {
                flags.push("retried");
            }
            if node.intervened {
                flags.push("intervened");
            }
            if node.old_retry {
                flags.push("superseded");
            }
            out.push_str(&format!("  {:<24} {}", node.identifier, node.status));
            if !flags.is_empty() {
                out.push_str(&format!(" [{}]", flags.join(", ")));
            }
            if let Some(failure) = &node.failure_info {
                out.push_str(&format!(" {}", failure.message));
            }
            out.push('\n');
        }
        out
    }
}

impl OrchestrationEngine {
    pub fn execution_summary(&self, plan_execution_id: &str) -> Result<ExecutionSummary, EngineError> {
        let execution = self.plan_execution(plan_execution_id)?;
        let nodes = self.node_executions(plan_execution_id)?;
        Ok(ExecutionSummary::from_parts(&execution, &nodes))
    }
}
