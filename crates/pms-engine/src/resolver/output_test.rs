use super::{Resolver, ResolverError, ScopedOutputResolver};
use crate::repository::InMemoryOutputRepository;
use crate::resolver::OutputScope;
use crate::timeout::ManualClock;
use pms_core::{Ambiance, Level, RefObject, RefType, StepCategory, StepType};
use serde_json::json;
use std::sync::Arc;

fn resolver(ref_type: RefType, outputs: Arc<InMemoryOutputRepository>) -> ScopedOutputResolver {
    ScopedOutputResolver::new(ref_type, outputs, Arc::new(ManualClock::new(10)))
}

fn stage() -> Ambiance {
    Ambiance::new("exec-1", "plan-1").clone_for_child(Level::new(
        "s",
        "stage",
        "deploy",
        StepType::new("SECTION", StepCategory::Stage),
    ))
}

fn step(stage: &Ambiance, runtime_id: &str) -> Ambiance {
    stage.clone_for_child(Level::new(runtime_id, runtime_id, runtime_id, StepType::step("SHELL")))
}

#[test]
fn siblings_see_step_scoped_outputs_but_other_executions_do_not() {
    let outputs = Arc::new(InMemoryOutputRepository::default());
    let sweeping = resolver(RefType::SweepingOutput, outputs.clone());
    let stage = stage();
    let producer = step(&stage, "a");
    sweeping
        .consume(&producer, "artifact", json!({"tag": "v1"}), &OutputScope::Step)
        .expect("consume must succeed");

    let sibling = step(&stage, "b");
    let value = sweeping
        .resolve(
            &sibling,
            &RefObject {
                name: "image".to_string(),
                key: "artifact".to_string(),
                ref_type: RefType::SweepingOutput,
            },
        )
        .expect("sibling must resolve");
    assert_eq!(value, json!({"tag": "v1"}));

    let elsewhere = Ambiance::new("exec-2", "plan-1");
    assert!(sweeping
        .find(&elsewhere, "artifact")
        .expect("lookup must succeed")
        .is_none());
}

#[test]
fn nearest_scope_wins() {
    let outputs = Arc::new(InMemoryOutputRepository::default());
    let sweeping = resolver(RefType::SweepingOutput, outputs);
    let stage = stage();
    let producer = step(&stage, "a");
    sweeping
        .consume(&producer, "region", json!("global"), &OutputScope::Pipeline)
        .expect("consume must succeed");
    sweeping
        .consume(&producer, "region", json!("stage"), &OutputScope::Step)
        .expect("consume must succeed");

    let reader = step(&stage, "b");
    assert_eq!(
        sweeping.find(&reader, "region").expect("lookup must succeed"),
        Some(json!("stage"))
    );
    assert_eq!(
        sweeping
            .find(&Ambiance::new("exec-1", "plan-1"), "region")
            .expect("lookup must succeed"),
        Some(json!("global"))
    );
}

#[test]
fn duplicate_names_need_explicit_overwrite() {
    let outputs = Arc::new(InMemoryOutputRepository::default());
    let sweeping = resolver(RefType::SweepingOutput, outputs.clone());
    let producer = step(&stage(), "a");
    sweeping
        .consume(&producer, "count", json!(1), &OutputScope::Step)
        .expect("consume must succeed");
    let error = sweeping
        .consume(&producer, "count", json!(2), &OutputScope::Step)
        .expect_err("duplicate must be rejected");
    assert_eq!(
        error,
        ResolverError::Duplicate {
            name: "count".to_string(),
            scope: OutputScope::Step
        }
    );

    sweeping
        .overwrite(&producer, "count", json!(3), &OutputScope::Step)
        .expect("overwrite must succeed");
    assert_eq!(
        sweeping.find(&producer, "count").expect("lookup must succeed"),
        Some(json!(3))
    );
}

#[test]
fn outcomes_and_sweeping_outputs_do_not_mix() {
    let outputs = Arc::new(InMemoryOutputRepository::default());
    let sweeping = resolver(RefType::SweepingOutput, outputs.clone());
    let outcome = resolver(RefType::Outcome, outputs);
    let producer = step(&stage(), "a");
    outcome
        .consume(&producer, "result", json!("ok"), &OutputScope::Step)
        .expect("consume must succeed");
    assert!(sweeping
        .find(&producer, "result")
        .expect("lookup must succeed")
        .is_none());

    let error = outcome
        .consume(&producer, "x", json!(1), &OutputScope::Group("MISSING".to_string()))
        .expect_err("missing group must fail");
    assert!(matches!(error, ResolverError::ScopeUnavailable { .. }));
}
