use super::EngineRegistries;
use crate::registry::RegistryError;
use crate::repository::InMemoryOutputRepository;
use crate::step::NoopStep;
use crate::timeout::ManualClock;
use pms_core::{RefType, StepCategory};
use std::sync::Arc;

fn defaults() -> EngineRegistries {
    EngineRegistries::with_defaults(
        Arc::new(InMemoryOutputRepository::default()),
        Arc::new(ManualClock::new(0)),
    )
    .expect("defaults must register")
}

#[test]
fn defaults_cover_every_builtin() {
    let registries = defaults();
    for key in ["SYNC", "ASYNC", "CHILD", "CHILDREN", "TASK", "TASK_CHAIN", "WAIT"] {
        assert!(registries.facilitators.contains(key), "missing facilitator {key}");
    }
    for key in ["ON_SUCCESS", "ON_FAIL", "RETRY", "MANUAL_INTERVENTION", "IGNORE"] {
        assert!(registries.advisers.contains(key), "missing adviser {key}");
    }
    assert_eq!(registries.steps.len(), 4);
    assert_eq!(registries.timeout_trackers.len(), 2);
    assert!(registries.resolver(RefType::Outcome).is_ok());
    assert_eq!(
        registries.group_for_category(StepCategory::Stage).as_deref(),
        Some("STAGE")
    );
}

#[test]
fn registering_defaults_twice_fails_without_losing_entries() {
    let registries = defaults();
    let error = registries
        .register_defaults(
            Arc::new(InMemoryOutputRepository::default()),
            Arc::new(ManualClock::new(0)),
        )
        .expect_err("second registration must fail");
    assert!(matches!(error, RegistryError::DuplicateRegistry { registry: "step", .. }));
    assert_eq!(registries.steps.len(), 4);

    registries
        .steps
        .register("CUSTOM", Arc::new(NoopStep))
        .expect("new key must register");
    assert!(registries.steps.obtain("CUSTOM").is_ok());
}
