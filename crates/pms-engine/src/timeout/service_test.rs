use super::{TimeoutEngine, TimeoutError};
use crate::registry::Registry;
use crate::repository::{InMemoryTimeoutInstanceRepository, TimeoutInstanceRepository};
use crate::timeout::{
    AbsoluteTimeoutTracker, ActiveTimeoutTracker, TimeoutCallback, TimeoutTracker, ABSOLUTE_TIMEOUT,
    ACTIVE_TIMEOUT,
};
use pms_core::Status;
use std::sync::Arc;

fn engine() -> (TimeoutEngine, Arc<InMemoryTimeoutInstanceRepository>) {
    let trackers = Arc::new(Registry::<dyn TimeoutTracker>::new("timeout_tracker"));
    trackers
        .register(ACTIVE_TIMEOUT, Arc::new(ActiveTimeoutTracker))
        .expect("register must succeed");
    trackers
        .register(ABSOLUTE_TIMEOUT, Arc::new(AbsoluteTimeoutTracker))
        .expect("register must succeed");
    let repository = Arc::new(InMemoryTimeoutInstanceRepository::default());
    (TimeoutEngine::new(trackers, repository.clone(), 4), repository)
}

fn expire(node_execution_id: &str) -> TimeoutCallback {
    TimeoutCallback::ExpireNode {
        node_execution_id: node_execution_id.to_string(),
    }
}

#[test]
fn unknown_dimension_is_rejected() {
    let (engine, _) = engine();
    let error = engine
        .register("exec-1", "WALL", 1_000, expire("n1"), 0)
        .expect_err("unknown dimension must fail");
    assert_eq!(
        error,
        TimeoutError::UnknownDimension {
            dimension: "WALL".to_string()
        }
    );
}

#[test]
fn active_timeout_does_not_fire_while_node_waits_for_intervention() {
    let (engine, _) = engine();
    engine
        .register("exec-1", ACTIVE_TIMEOUT, 1_000, expire("n1"), 0)
        .expect("register must succeed");
    engine
        .on_status_update("n1", Status::InterventionWaiting, 400)
        .expect("update must succeed");
    assert!(engine.poll_expired(5_000).expect("poll must succeed").is_empty());

    engine
        .on_status_update("n1", Status::Running, 5_000)
        .expect("update must succeed");
    assert!(engine.poll_expired(5_599).expect("poll must succeed").is_empty());
    let fired = engine.poll_expired(5_600).expect("poll must succeed");
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].callback, expire("n1"));
}

#[test]
fn fired_instances_are_returned_once() {
    let (engine, repository) = engine();
    engine
        .register("exec-1", ABSOLUTE_TIMEOUT, 100, expire("n1"), 0)
        .expect("register must succeed");
    engine
        .register("exec-1", ABSOLUTE_TIMEOUT, 50, expire("n2"), 0)
        .expect("register must succeed");

    let fired = engine.poll_expired(1_000).expect("poll must succeed");
    let nodes = fired
        .iter()
        .map(|instance| instance.node_execution_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(nodes, vec!["n2", "n1"]);
    assert!(engine.poll_expired(2_000).expect("poll must succeed").is_empty());
    assert!(repository.find_all().expect("must list").is_empty());
}

#[test]
fn delete_for_node_removes_only_that_node() {
    let (engine, repository) = engine();
    engine
        .register("exec-1", ACTIVE_TIMEOUT, 100, expire("n1"), 0)
        .expect("register must succeed");
    engine
        .register("exec-1", ACTIVE_TIMEOUT, 100, expire("n2"), 0)
        .expect("register must succeed");
    assert_eq!(engine.delete_for_node("n1").expect("delete must succeed"), 1);
    let remaining = repository.find_all().expect("must list");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].node_execution_id, "n2");
}
