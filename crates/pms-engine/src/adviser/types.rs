use pms_core::{Ambiance, FailureInfo, FailureType, PlanNode, Status};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviseType {
    NextStep,
    Retry,
    InterventionWait,
    EndPlan,
    MarkSuccess,
    IgnoreFailure,
    MarkAsFailure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairAction {
    ManualIntervention,
    EndExecution,
    Ignore,
    MarkAsSuccess,
    #[default]
    MarkAsFailure,
    OnFail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviserResponse {
    NextStep {
        next_node_id: String,
    },
    Retry {
        wait_ms: u64,
        attempt: u32,
    },
    InterventionWait {
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        timeout_action: RepairAction,
    },
    EndPlan,
    MarkSuccess {
        #[serde(default)]
        next_node_id: Option<String>,
    },
    IgnoreFailure {
        #[serde(default)]
        next_node_id: Option<String>,
    },
    MarkAsFailure,
}

impl AdviserResponse {
    pub fn advise_type(&self) -> AdviseType {
        match self {
            AdviserResponse::NextStep { .. } => AdviseType::NextStep,
            AdviserResponse::Retry { .. } => AdviseType::Retry,
            AdviserResponse::InterventionWait { .. } => AdviseType::InterventionWait,
            AdviserResponse::EndPlan => AdviseType::EndPlan,
            AdviserResponse::MarkSuccess { .. } => AdviseType::MarkSuccess,
            AdviserResponse::IgnoreFailure { .. } => AdviseType::IgnoreFailure,
            AdviserResponse::MarkAsFailure => AdviseType::MarkAsFailure,
        }
    }
}

/// Maps a repair action onto the response that carries it out.
pub fn repair_response(action: RepairAction, next_node_id: Option<String>) -> AdviserResponse {
    match action {
        RepairAction::ManualIntervention => AdviserResponse::InterventionWait {
            timeout_ms: None,
            timeout_action: RepairAction::MarkAsFailure,
        },
        RepairAction::EndExecution => AdviserResponse::EndPlan,
        RepairAction::Ignore => AdviserResponse::IgnoreFailure { next_node_id },
        RepairAction::MarkAsSuccess => AdviserResponse::MarkSuccess { next_node_id },
        RepairAction::MarkAsFailure => AdviserResponse::MarkAsFailure,
        RepairAction::OnFail => match next_node_id {
            Some(next_node_id) => AdviserResponse::NextStep { next_node_id },
            None => AdviserResponse::MarkAsFailure,
        },
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdvisingEvent<'a> {
    pub ambiance: &'a Ambiance,
    pub plan_node: &'a PlanNode,
    pub node_execution_id: &'a str,
    pub from_status: Status,
    pub to_status: Status,
    pub failure_info: Option<&'a FailureInfo>,
    /// Attempts already made before this one.
    pub retry_count: usize,
    pub previous_advise_type: Option<AdviseType>,
    pub parameters: &'a Value,
}

impl AdvisingEvent<'_> {
    pub fn failure_matches(&self, filter: &BTreeSet<FailureType>) -> bool {
        match self.failure_info {
            Some(info) => info.matches_any(filter),
            None => filter.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdviserError {
    #[error("adviser `{adviser}` parameters are invalid: {reason}")]
    InvalidParameters { adviser: &'static str, reason: String },
}

pub trait Adviser: Send + Sync {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool;
    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, AdviserError>;
}

pub fn parse_adviser_parameters<T: DeserializeOwned>(
    adviser: &'static str,
    parameters: &Value,
) -> Result<T, AdviserError> {
    serde_json::from_value(parameters.clone()).map_err(|error| AdviserError::InvalidParameters {
        adviser,
        reason: error.to_string(),
    })
}
