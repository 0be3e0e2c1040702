use super::{IgnoreAdviser, ManualInterventionAdviser, OnFailAdviser, OnSuccessAdviser, RetryAdviser};
use crate::adviser::{AdviseType, Adviser, AdviserError, AdviserResponse, AdvisingEvent, RepairAction};
use pms_core::{Ambiance, FailureInfo, FailureType, PlanNode, Status, StepType};
use serde_json::{json, Value};

struct Fixture {
    ambiance: Ambiance,
    plan_node: PlanNode,
    failure: FailureInfo,
}

impl Fixture {
    fn new() -> Self {
        Self {
            ambiance: Ambiance::new("exec-1", "plan-1"),
            plan_node: PlanNode::new("a", "a", StepType::step("SHELL")),
            failure: FailureInfo::application("exit 1"),
        }
    }

    fn event<'a>(&'a self, to_status: Status, retry_count: usize, parameters: &'a Value) -> AdvisingEvent<'a> {
        AdvisingEvent {
            ambiance: &self.ambiance,
            plan_node: &self.plan_node,
            node_execution_id: "node-exec-1",
            from_status: Status::Running,
            to_status,
            failure_info: to_status.is_broken().then_some(&self.failure),
            retry_count,
            previous_advise_type: None,
            parameters,
        }
    }
}

#[test]
fn on_success_only_handles_positive_statuses() {
    let fixture = Fixture::new();
    let parameters = json!({"next_node_id": "b"});
    assert!(OnSuccessAdviser.can_advise(&fixture.event(Status::Succeeded, 0, &parameters)));
    assert!(OnSuccessAdviser.can_advise(&fixture.event(Status::Skipped, 0, &parameters)));
    assert!(!OnSuccessAdviser.can_advise(&fixture.event(Status::Failed, 0, &parameters)));

    let response = OnSuccessAdviser
        .on_advise_event(&fixture.event(Status::Succeeded, 0, &parameters))
        .expect("must advise");
    assert_eq!(
        response,
        AdviserResponse::NextStep {
            next_node_id: "b".to_string()
        }
    );
}

#[test]
fn on_success_rejects_missing_next_node() {
    let fixture = Fixture::new();
    let parameters = json!({});
    let error = OnSuccessAdviser
        .on_advise_event(&fixture.event(Status::Succeeded, 0, &parameters))
        .expect_err("missing next node must be rejected");
    assert!(matches!(error, AdviserError::InvalidParameters { adviser: "ON_SUCCESS", .. }));
}

#[test]
fn on_fail_respects_failure_type_filter() {
    let fixture = Fixture::new();
    let timeouts_only = json!({"next_node_id": "rollback", "applicable_failure_types": ["TIMEOUT"]});
    assert!(!OnFailAdviser.can_advise(&fixture.event(Status::Failed, 0, &timeouts_only)));

    let any = json!({"next_node_id": "rollback"});
    assert!(OnFailAdviser.can_advise(&fixture.event(Status::Failed, 0, &any)));
    assert!(!OnFailAdviser.can_advise(&fixture.event(Status::Succeeded, 0, &any)));
}

#[test]
fn retry_counts_attempts_then_repairs() {
    let fixture = Fixture::new();
    let parameters = json!({"retry_count": 2, "wait_intervals_ms": [100, 500]});

    let first = RetryAdviser
        .on_advise_event(&fixture.event(Status::Failed, 0, &parameters))
        .expect("must advise");
    assert_eq!(first, AdviserResponse::Retry { wait_ms: 100, attempt: 1 });

    let second = RetryAdviser
        .on_advise_event(&fixture.event(Status::Failed, 1, &parameters))
        .expect("must advise");
    assert_eq!(second, AdviserResponse::Retry { wait_ms: 500, attempt: 2 });

    let exhausted = RetryAdviser
        .on_advise_event(&fixture.event(Status::Failed, 2, &parameters))
        .expect("must advise");
    assert_eq!(exhausted, AdviserResponse::MarkAsFailure);
}

#[test]
fn retry_reuses_last_interval_and_honors_repair_action() {
    let fixture = Fixture::new();
    let parameters = json!({
        "retry_count": 3,
        "wait_intervals_ms": [50],
        "repair_action_after_retry": "ON_FAIL",
        "next_node_id": "rollback"
    });
    let third = RetryAdviser
        .on_advise_event(&fixture.event(Status::Failed, 2, &parameters))
        .expect("must advise");
    assert_eq!(third, AdviserResponse::Retry { wait_ms: 50, attempt: 3 });

    let exhausted = RetryAdviser
        .on_advise_event(&fixture.event(Status::Failed, 3, &parameters))
        .expect("must advise");
    assert_eq!(
        exhausted,
        AdviserResponse::NextStep {
            next_node_id: "rollback".to_string()
        }
    );
}

#[test]
fn failure_advisers_step_aside_after_intervention() {
    let fixture = Fixture::new();
    let parameters = json!({"retry_count": 1});
    let mut event = fixture.event(Status::Failed, 0, &parameters);
    event.previous_advise_type = Some(AdviseType::InterventionWait);
    assert!(!RetryAdviser.can_advise(&event));

    let manual = Value::Null;
    let mut event = fixture.event(Status::Failed, 0, &manual);
    assert!(ManualInterventionAdviser.can_advise(&event));
    event.previous_advise_type = Some(AdviseType::InterventionWait);
    assert!(!ManualInterventionAdviser.can_advise(&event));
}

#[test]
fn manual_intervention_never_loops_on_timeout() {
    let fixture = Fixture::new();
    let parameters = json!({"timeout_ms": 1000, "timeout_action": "MANUAL_INTERVENTION"});
    let response = ManualInterventionAdviser
        .on_advise_event(&fixture.event(Status::Errored, 0, &parameters))
        .expect("must advise");
    assert_eq!(
        response,
        AdviserResponse::InterventionWait {
            timeout_ms: Some(1000),
            timeout_action: RepairAction::MarkAsFailure
        }
    );
}

#[test]
fn ignore_filters_by_failure_type() {
    let mut fixture = Fixture::new();
    fixture.failure = FailureInfo::new("deadline", FailureType::Timeout);
    let parameters = json!({"applicable_failure_types": ["TIMEOUT"], "next_node_id": "b"});
    let event = fixture.event(Status::Expired, 0, &parameters);
    assert!(IgnoreAdviser.can_advise(&event));
    assert_eq!(
        IgnoreAdviser.on_advise_event(&event).expect("must advise"),
        AdviserResponse::IgnoreFailure {
            next_node_id: Some("b".to_string())
        }
    );
}

#[test]
fn adviser_response_uses_type_tag() {
    let encoded = serde_json::to_value(AdviserResponse::EndPlan).expect("must encode");
    assert_eq!(encoded, json!({"type": "END_PLAN"}));
    assert_eq!(AdviserResponse::EndPlan.advise_type(), AdviseType::EndPlan);
}
