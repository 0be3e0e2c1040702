use super::{plan_hash, stable_hash_hex};
use crate::ambiance::StepType;
use crate::plan::{FacilitatorObtainment, Plan, PlanNode};
use serde_json::json;

fn node(uuid: &str, parameters: serde_json::Value) -> PlanNode {
    PlanNode::new(uuid, uuid, StepType::step("NOOP"))
        .with_facilitator(FacilitatorObtainment::new("SYNC"))
        .with_parameters(parameters)
}

#[test]
fn plan_hash_ignores_declaration_order() {
    let left = Plan::new("p", "a", vec![node("a", json!({"x": 1, "y": 2})), node("b", json!(null))])
        .expect("plan must build");
    let right = Plan::new("p", "a", vec![node("b", json!(null)), node("a", json!({"y": 2, "x": 1}))])
        .expect("plan must build");
    assert_eq!(
        plan_hash(&left).expect("hash"),
        plan_hash(&right).expect("hash")
    );
}

#[test]
fn plan_hash_changes_with_parameters() {
    let left = Plan::new("p", "a", vec![node("a", json!({"x": 1}))]).expect("plan must build");
    let right = Plan::new("p", "a", vec![node("a", json!({"x": 2}))]).expect("plan must build");
    assert_ne!(plan_hash(&left).expect("hash"), plan_hash(&right).expect("hash"));
}

#[test]
fn stable_hash_is_hex_sha256() {
    let hash = stable_hash_hex(&json!({"a": 1})).expect("hash");
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|ch| ch.is_ascii_hexdigit()));
}
