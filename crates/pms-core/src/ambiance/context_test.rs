use super::{Ambiance, SETUP_ACCOUNT_ID, SETUP_ORG_IDENTIFIER, SETUP_PROJECT_IDENTIFIER};
use crate::ambiance::{Level, StepCategory, StepType};
use std::collections::BTreeMap;

fn level(runtime_id: &str, identifier: &str, category: StepCategory) -> Level {
    Level::new(
        runtime_id,
        format!("setup-{runtime_id}"),
        identifier,
        StepType::new(identifier.to_uppercase(), category),
    )
}

fn build_ambiance() -> Ambiance {
    let mut setup = BTreeMap::new();
    setup.insert(SETUP_ACCOUNT_ID.to_string(), "kmpy".to_string());
    setup.insert(SETUP_ORG_IDENTIFIER.to_string(), "default".to_string());
    setup.insert(SETUP_PROJECT_IDENTIFIER.to_string(), "checkout".to_string());
    Ambiance::new("exec-1", "plan-1")
        .with_setup_abstractions(setup)
        .clone_for_child(level("r-pipeline", "pipeline", StepCategory::Pipeline))
        .clone_for_child(
            level("r-stages", "stages", StepCategory::Step).with_group("STAGES"),
        )
        .clone_for_child(level("r-stage1", "stage1", StepCategory::Stage).with_group("STAGE"))
        .clone_for_child(level("r-spec", "spec", StepCategory::Step))
        .clone_for_child(level("r-execution", "execution", StepCategory::Step))
        .clone_for_child(level("r-step1", "step1", StepCategory::Step).with_start_ts(42))
}

#[test]
fn clone_for_child_appends_without_touching_parent() {
    let parent = Ambiance::new("exec-1", "plan-1")
        .clone_for_child(level("r1", "pipeline", StepCategory::Pipeline));
    let child = parent.clone_for_child(level("r2", "stage", StepCategory::Stage));

    assert_eq!(parent.depth(), 1);
    assert_eq!(child.depth(), 2);
    assert_eq!(child.current_runtime_id(), Some("r2"));
    assert_eq!(child.parent_runtime_id(), Some("r1"));
    assert_eq!(parent.current_runtime_id(), Some("r1"));
}

#[test]
fn clone_for_finish_drops_last_level_and_keeps_ids() {
    let ambiance = build_ambiance();
    let finished = ambiance.clone_for_finish();

    assert_eq!(finished.depth(), ambiance.depth() - 1);
    assert_eq!(finished.current_runtime_id(), Some("r-execution"));
    assert_eq!(finished.plan_execution_id, "exec-1");
    assert_eq!(finished.plan_id, "plan-1");
    assert_eq!(finished.account_id(), Some("kmpy"));
}

#[test]
fn clone_to_depth_clamps_to_level_count() {
    let ambiance = build_ambiance();
    assert_eq!(ambiance.clone_to_depth(2).depth(), 2);
    assert_eq!(ambiance.clone_to_depth(100).depth(), ambiance.depth());
    assert_eq!(ambiance.clone_to_depth(0).current_level(), None);
    assert_eq!(Ambiance::new("e", "p").clone_for_finish().depth(), 0);
}

#[test]
fn accessors_read_current_level() {
    let ambiance = build_ambiance();
    assert_eq!(ambiance.current_setup_id(), Some("setup-r-step1"));
    assert_eq!(ambiance.step_identifier(), Some("step1"));
    assert_eq!(
        ambiance.current_step_type().map(|step_type| step_type.type_name.as_str()),
        Some("STEP1")
    );
    assert_eq!(ambiance.current_level_start_ts(), Some(42));
    assert_eq!(ambiance.current_group(), None);
    assert_eq!(ambiance.org_identifier(), Some("default"));
    assert_eq!(ambiance.project_identifier(), Some("checkout"));
}

#[test]
fn stage_level_is_nearest_stage_category() {
    let ambiance = build_ambiance();
    let stage = ambiance.stage_level().expect("stage level must exist");
    assert_eq!(stage.identifier, "stage1");
    assert!(Ambiance::new("e", "p").stage_level().is_none());
}

#[test]
fn fqn_joins_identifiers() {
    assert_eq!(
        build_ambiance().fqn(),
        "pipeline.stages.stage1.spec.execution.step1"
    );
}

#[test]
fn fqn_skips_parallel_and_marked_levels() {
    let ambiance = Ambiance::new("exec-1", "plan-1")
        .clone_for_child(level("r1", "pipeline", StepCategory::Pipeline))
        .clone_for_child(level("r2", "parallel", StepCategory::Step))
        .clone_for_child(
            level("r3", "strategy", StepCategory::Strategy).with_skip_expression_chain(true),
        )
        .clone_for_child(level("r4", "build", StepCategory::Step));
    assert_eq!(ambiance.fqn(), "pipeline.build");
}

#[test]
fn ambiance_round_trips_through_json() {
    let ambiance = build_ambiance();
    let encoded = serde_json::to_value(&ambiance).expect("must encode");
    let decoded: Ambiance = serde_json::from_value(encoded).expect("must decode");
    assert_eq!(decoded, ambiance);
}
