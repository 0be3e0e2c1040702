use super::{active_node_executions, error_out_active_nodes, find_descendants, update_node_execution};
use crate::execution::{NodeExecution, WaitKind, WaitState};
use crate::repository::{
    InMemoryNodeExecutionRepository, NodeExecutionCriteria, NodeExecutionRepository,
};
use pms_core::{Ambiance, FailureInfo, FailureType, Status, StepType};

fn node(uuid: &str, parent_id: Option<&str>, status: Status, start_ts: i64) -> NodeExecution {
    NodeExecution {
        uuid: uuid.to_string(),
        plan_execution_id: "exec-1".to_string(),
        plan_node_id: format!("plan-{uuid}"),
        identifier: uuid.to_string(),
        ambiance: Ambiance::new("exec-1", "plan-1"),
        status,
        mode: None,
        step_type: StepType::step("NOOP"),
        parent_id: parent_id.map(str::to_string),
        previous_id: None,
        next_id: None,
        start_ts,
        end_ts: None,
        adviser_response: None,
        failure_info: None,
        timeout_instance_ids: Vec::new(),
        retry_ids: Vec::new(),
        old_retry: false,
        interrupt_history: Vec::new(),
        waiting: None,
        children: None,
        paused_from: None,
        pending_status: None,
        pending_response: None,
        version: 0,
    }
}

fn tree() -> InMemoryNodeExecutionRepository {
    let repository = InMemoryNodeExecutionRepository::default();
    let mut retried = node("c-old", Some("b"), Status::Failed, 4);
    retried.old_retry = true;
    for node in [
        node("a", None, Status::Running, 1),
        node("b", Some("a"), Status::Running, 2),
        node("c", Some("b"), Status::Succeeded, 3),
        retried,
        node("d", Some("b"), Status::TaskWaiting, 5),
        node("e", Some("d"), Status::Queued, 6),
    ] {
        repository.save(node).expect("save must succeed");
    }
    repository
}

#[test]
fn descendants_skip_old_retries() {
    let repository = tree();
    let ids = find_descendants(&repository, "exec-1", "a")
        .expect("query must succeed")
        .into_iter()
        .map(|node| node.uuid)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["b", "c", "d", "e"]);
}

#[test]
fn children_counts_filter_by_status() {
    let repository = tree();
    let finished = repository
        .find_all(
            &NodeExecutionCriteria::for_plan_execution("exec-1")
                .children_of("b")
                .with_statuses(Status::final_statuses()),
        )
        .expect("query must succeed");
    assert_eq!(finished.len(), 1);
    let all_attempts = repository
        .find_all(
            &NodeExecutionCriteria::for_plan_execution("exec-1")
                .children_of("b")
                .including_old_retries(),
        )
        .expect("query must succeed");
    assert_eq!(all_attempts.len(), 3);
}

#[test]
fn correlation_lookup_finds_the_waiting_node() {
    let repository = tree();
    let current = repository.find_by_id("d").expect("lookup must succeed").expect("must exist");
    update_node_execution(&repository, &current.uuid, 3, |node| {
        node.waiting = Some(WaitState::new(WaitKind::Task, vec!["task-1".to_string()]));
        Some(())
    })
    .expect("update must succeed");

    let found = repository
        .find_by_correlation_id("task-1")
        .expect("lookup must succeed")
        .expect("waiting node must be found");
    assert_eq!(found.uuid, "d");
    assert!(repository
        .find_by_correlation_id("task-2")
        .expect("lookup must succeed")
        .is_none());
}

#[test]
fn error_out_marks_only_active_nodes() {
    let repository = tree();
    update_node_execution(&repository, "d", 3, |node| {
        let mut waiting = WaitState::new(WaitKind::Task, vec!["corr-1".to_string()]);
        waiting.task_ids.push("task-1".to_string());
        node.waiting = Some(waiting);
        Some(())
    })
    .expect("update must succeed");

    let failure = FailureInfo::new("step NOPE is not registered", FailureType::Configuration);
    let mut changed = error_out_active_nodes(&repository, "exec-1", 3, &failure, 99)
        .expect("error out must succeed");
    changed.sort_by(|(left, _), (right, _)| left.uuid.cmp(&right.uuid));
    let ids = changed.iter().map(|(node, _)| node.uuid.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["a", "b", "d", "e"]);
    let released = changed
        .iter()
        .filter(|(_, task_ids)| !task_ids.is_empty())
        .map(|(node, task_ids)| (node.uuid.as_str(), task_ids.clone()))
        .collect::<Vec<_>>();
    assert_eq!(released, vec![("d", vec!["task-1".to_string()])]);

    assert!(active_node_executions(&repository, "exec-1")
        .expect("query must succeed")
        .is_empty());
    let c = repository.find_by_id("c").expect("lookup must succeed").expect("must exist");
    assert_eq!(c.status, Status::Succeeded);
    let e = repository.find_by_id("e").expect("lookup must succeed").expect("must exist");
    assert_eq!(e.status, Status::Errored);
    assert_eq!(e.end_ts, Some(99));
}
