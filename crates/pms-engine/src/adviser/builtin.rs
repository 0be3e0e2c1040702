use super::types::{
    parse_adviser_parameters, repair_response, AdviseType, Adviser, AdviserError, AdviserResponse,
    AdvisingEvent, RepairAction,
};
use pms_core::FailureType;
use serde::Deserialize;
use std::collections::BTreeSet;

pub const ON_SUCCESS: &str = "ON_SUCCESS";
pub const ON_FAIL: &str = "ON_FAIL";
pub const RETRY: &str = "RETRY";
pub const MANUAL_INTERVENTION: &str = "MANUAL_INTERVENTION";
pub const IGNORE: &str = "IGNORE";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NextNodeParameters {
    next_node_id: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OnSuccessAdviser;

impl Adviser for OnSuccessAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        event.to_status.is_positive()
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, AdviserError> {
        let parameters: NextNodeParameters = parse_adviser_parameters(ON_SUCCESS, event.parameters)?;
        Ok(AdviserResponse::NextStep {
            next_node_id: parameters.next_node_id,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OnFailParameters {
    next_node_id: String,
    #[serde(default)]
    applicable_failure_types: BTreeSet<FailureType>,
}

/// Routes a broken node to a failure-handling node such as a rollback section.
#[derive(Debug, Default, Clone, Copy)]
pub struct OnFailAdviser;

impl Adviser for OnFailAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        if !event.to_status.is_broken() {
            return false;
        }
        match parse_adviser_parameters::<OnFailParameters>(ON_FAIL, event.parameters) {
            Ok(parameters) => event.failure_matches(&parameters.applicable_failure_types),
            Err(_) => true,
        }
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, AdviserError> {
        let parameters: OnFailParameters = parse_adviser_parameters(ON_FAIL, event.parameters)?;
        Ok(AdviserResponse::NextStep {
            next_node_id: parameters.next_node_id,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetryParameters {
    retry_count: u32,
    #[serde(default)]
    wait_intervals_ms: Vec<u64>,
    #[serde(default)]
    repair_action_after_retry: RepairAction,
    #[serde(default)]
    next_node_id: Option<String>,
    #[serde(default)]
    applicable_failure_types: BTreeSet<FailureType>,
}

/// Retries a broken node up to `retry_count` times, then applies the repair action.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryAdviser;

impl Adviser for RetryAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        if !event.to_status.is_broken()
            || event.previous_advise_type == Some(AdviseType::InterventionWait)
        {
            return false;
        }
        match parse_adviser_parameters::<RetryParameters>(RETRY, event.parameters) {
            Ok(parameters) => event.failure_matches(&parameters.applicable_failure_types),
            Err(_) => true,
        }
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, AdviserError> {
        let parameters: RetryParameters = parse_adviser_parameters(RETRY, event.parameters)?;
        let attempts = event.retry_count;
        if attempts < parameters.retry_count as usize {
            let wait_ms = match parameters.wait_intervals_ms.as_slice() {
                [] => 0,
                intervals => intervals[attempts.min(intervals.len() - 1)],
            };
            return Ok(AdviserResponse::Retry {
                wait_ms,
                attempt: attempts as u32 + 1,
            });
        }
        Ok(repair_response(
            parameters.repair_action_after_retry,
            parameters.next_node_id,
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManualInterventionParameters {
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    timeout_action: RepairAction,
    #[serde(default)]
    applicable_failure_types: BTreeSet<FailureType>,
}

/// Parks a broken node until an interrupt decides how it continues.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualInterventionAdviser;

impl Adviser for ManualInterventionAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        if !event.to_status.is_broken()
            || event.previous_advise_type == Some(AdviseType::InterventionWait)
        {
            return false;
        }
        if event.parameters.is_null() {
            return true;
        }
        match parse_adviser_parameters::<ManualInterventionParameters>(
            MANUAL_INTERVENTION,
            event.parameters,
        ) {
            Ok(parameters) => event.failure_matches(&parameters.applicable_failure_types),
            Err(_) => true,
        }
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, AdviserError> {
        let parameters = if event.parameters.is_null() {
            ManualInterventionParameters::default()
        } else {
            parse_adviser_parameters::<ManualInterventionParameters>(
                MANUAL_INTERVENTION,
                event.parameters,
            )?
        };
        let timeout_action = match parameters.timeout_action {
            RepairAction::ManualIntervention => RepairAction::MarkAsFailure,
            other => other,
        };
        Ok(AdviserResponse::InterventionWait {
            timeout_ms: parameters.timeout_ms,
            timeout_action,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct IgnoreParameters {
    #[serde(default)]
    next_node_id: Option<String>,
    #[serde(default)]
    applicable_failure_types: BTreeSet<FailureType>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreAdviser;

impl Adviser for IgnoreAdviser {
    fn can_advise(&self, event: &AdvisingEvent<'_>) -> bool {
        if !event.to_status.is_broken() {
            return false;
        }
        if event.parameters.is_null() {
            return true;
        }
        match parse_adviser_parameters::<IgnoreParameters>(IGNORE, event.parameters) {
            Ok(parameters) => event.failure_matches(&parameters.applicable_failure_types),
            Err(_) => true,
        }
    }

    fn on_advise_event(&self, event: &AdvisingEvent<'_>) -> Result<AdviserResponse, AdviserError> {
        let parameters = if event.parameters.is_null() {
            IgnoreParameters::default()
        } else {
            parse_adviser_parameters::<IgnoreParameters>(IGNORE, event.parameters)?
        };
        Ok(AdviserResponse::IgnoreFailure {
            next_node_id: parameters.next_node_id,
        })
    }
}

#[cfg(test)]
#[path = "builtin_test.rs"]
mod tests;
