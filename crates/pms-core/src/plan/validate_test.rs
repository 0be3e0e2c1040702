use super::validate_plan_nodes;
use crate::ambiance::StepType;
use crate::expression::Expression;
use crate::plan::{AdviserObtainment, FacilitatorObtainment, PlanNode, RefObject, RefType};
use serde_json::json;

fn sync_node(uuid: &str) -> PlanNode {
    PlanNode::new(uuid, uuid, StepType::step("NOOP")).with_facilitator(FacilitatorObtainment::new("SYNC"))
}

fn kinds(starting: &str, nodes: &[PlanNode]) -> Vec<String> {
    validate_plan_nodes(starting, nodes)
        .into_iter()
        .map(|issue| issue.kind)
        .collect()
}

#[test]
fn linear_plan_is_valid() {
    let nodes = vec![
        sync_node("a").with_adviser(AdviserObtainment::new("ON_SUCCESS", json!({"next_node_id": "b"}))),
        sync_node("b"),
    ];
    assert!(validate_plan_nodes("a", &nodes).is_empty());
}

#[test]
fn empty_plan_is_rejected() {
    assert_eq!(kinds("a", &[]), vec!["plan.nodes.non_empty"]);
}

#[test]
fn duplicate_uuid_and_missing_start_are_reported() {
    let nodes = vec![sync_node("a"), sync_node("a")];
    let found = kinds("z", &nodes);
    assert!(found.contains(&"plan.node.duplicate_uuid".to_string()));
    assert!(found.contains(&"plan.starting_node.missing".to_string()));
}

#[test]
fn node_without_facilitator_is_rejected() {
    let nodes = vec![PlanNode::new("a", "a", StepType::step("NOOP"))];
    assert_eq!(kinds("a", &nodes), vec!["plan.node.facilitators"]);
}

#[test]
fn identifier_must_match_pattern() {
    let nodes = vec![PlanNode::new("a", "1-bad id", StepType::step("NOOP"))
        .with_facilitator(FacilitatorObtainment::new("SYNC"))];
    assert_eq!(kinds("a", &nodes), vec!["plan.node.identifier"]);
}

#[test]
fn dangling_next_node_and_child_are_reported() {
    let nodes = vec![
        sync_node("a")
            .with_adviser(AdviserObtainment::new("ON_SUCCESS", json!({"next_node_id": "ghost"})))
            .with_parameters(json!({"children": ["b", "phantom"]})),
        sync_node("b"),
    ];
    let found = kinds("a", &nodes);
    assert!(found.contains(&"plan.node.next_node_missing".to_string()));
    assert!(found.contains(&"plan.node.child_missing".to_string()));
}

#[test]
fn next_node_cycle_is_reported_once() {
    let nodes = vec![
        sync_node("a").with_adviser(AdviserObtainment::new("ON_SUCCESS", json!({"next_node_id": "b"}))),
        sync_node("b").with_adviser(AdviserObtainment::new("ON_SUCCESS", json!({"next_node_id": "a"}))),
    ];
    let issues = validate_plan_nodes("a", &nodes);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, "plan.next_node.cycle");
    assert!(issues[0].message.contains("a -> b -> a"));
}

#[test]
fn zero_timeout_and_duplicate_inputs_are_rejected() {
    let reference = RefObject {
        name: "artifact".to_string(),
        key: "build".to_string(),
        ref_type: RefType::SweepingOutput,
    };
    let nodes = vec![sync_node("a")
        .with_timeout("ACTIVE", 0)
        .with_ref_object(reference.clone())
        .with_ref_object(reference)];
    let found = kinds("a", &nodes);
    assert!(found.contains(&"plan.node.timeout".to_string()));
    assert!(found.contains(&"plan.node.duplicate_input".to_string()));
}

#[test]
fn skip_condition_refs_need_known_roots() {
    let nodes = vec![sync_node("a").with_skip_condition(Expression::reference("env.flag"))];
    assert_eq!(kinds("a", &nodes), vec!["plan.node.skip_condition_ref"]);
    let nodes = vec![sync_node("a").with_skip_condition(Expression::reference("inputs.flag"))];
    assert!(kinds("a", &nodes).is_empty());
}
