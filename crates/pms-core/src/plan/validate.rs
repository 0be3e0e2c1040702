use super::types::PlanNode;
use crate::issues::{IssuePath, PlanIssue};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

const IDENTIFIER_PATTERN: &str = r"^[a-zA-Z_][0-9a-zA-Z_$]{0,127}$";
const REF_ROOTS: [&str; 4] = ["inputs", "output", "outcome", "ambiance"];

fn identifier_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).expect("valid regex"))
}

pub fn validate_plan_nodes(starting_node_id: &str, nodes: &[PlanNode]) -> Vec<PlanIssue> {
    let mut issues = Vec::new();
    if nodes.is_empty() {
        issues.push(PlanIssue::error(
            "plan.nodes.non_empty",
            IssuePath::root().key("nodes"),
            "plan must contain at least one node",
        ));
        return issues;
    }

    let mut seen = BTreeSet::new();
    for (index, node) in nodes.iter().enumerate() {
        if !seen.insert(node.uuid.as_str()) {
            issues.push(
                PlanIssue::error(
                    "plan.node.duplicate_uuid",
                    node_path(index).key("uuid"),
                    format!("node uuid `{}` is declared more than once", node.uuid),
                )
                .for_node(node.uuid.clone()),
            );
        }
    }

    if !seen.contains(starting_node_id) {
        issues.push(PlanIssue::error(
            "plan.starting_node.missing",
            IssuePath::root().key("starting_node_id"),
            format!("starting node `{starting_node_id}` is not part of the plan"),
        ));
    }

    for (index, node) in nodes.iter().enumerate() {
        validate_node(index, node, &seen, &mut issues);
    }

    detect_next_node_cycles(nodes, &mut issues);
    PlanIssue::sort_stable(&mut issues);
    issues
}

fn validate_node(index: usize, node: &PlanNode, known: &BTreeSet<&str>, issues: &mut Vec<PlanIssue>) {
    let path = node_path(index);
    if !identifier_regex().is_match(&node.identifier) {
        issues.push(
            PlanIssue::error(
                "plan.node.identifier",
                path.clone().key("identifier"),
                format!("identifier `{}` must match {IDENTIFIER_PATTERN}", node.identifier),
            )
            .for_node(node.uuid.clone()),
        );
    }

    if node.facilitator_obtainments.is_empty() {
        issues.push(
            PlanIssue::error(
                "plan.node.facilitators",
                path.clone().key("facilitator_obtainments"),
                "node must declare at least one facilitator obtainment",
            )
            .for_node(node.uuid.clone()),
        );
    }

    for (adviser_index, adviser) in node.adviser_obtainments.iter().enumerate() {
        if let Some(next) = next_node_id(&adviser.parameters) {
            if !known.contains(next) {
                issues.push(
                    PlanIssue::error(
                        "plan.node.next_node_missing",
                        path.clone()
                            .key("adviser_obtainments")
                            .index(adviser_index)
                            .key("parameters")
                            .key("next_node_id"),
                        format!("adviser `{}` targets unknown node `{next}`", adviser.adviser_type),
                    )
                    .for_node(node.uuid.clone()),
                );
            }
        }
    }

    for child in child_node_ids(&node.step_parameters) {
        if !known.contains(child) {
            issues.push(
                PlanIssue::error(
                    "plan.node.child_missing",
                    path.clone().key("step_parameters"),
                    format!("child node `{child}` is not part of the plan"),
                )
                .for_node(node.uuid.clone()),
            );
        }
    }

    for (timeout_index, timeout) in node.timeout_obtainments.iter().enumerate() {
        if timeout.timeout_ms == 0 {
            issues.push(
                PlanIssue::error(
                    "plan.node.timeout",
                    path.clone().key("timeout_obtainments").index(timeout_index),
                    format!("timeout for dimension `{}` must be > 0", timeout.dimension),
                )
                .for_node(node.uuid.clone()),
            );
        }
    }

    let mut input_names = BTreeSet::new();
    for (ref_index, ref_object) in node.ref_objects.iter().enumerate() {
        if !input_names.insert(ref_object.name.as_str()) {
            issues.push(
                PlanIssue::error(
                    "plan.node.duplicate_input",
                    path.clone().key("ref_objects").index(ref_index).key("name"),
                    format!("input `{}` is bound more than once", ref_object.name),
                )
                .for_node(node.uuid.clone()),
            );
        }
    }

    if let Some(condition) = &node.skip_condition {
        for reference in condition.refs() {
            let root = reference.split('.').next().unwrap_or_default();
            if !REF_ROOTS.contains(&root) {
                issues.push(
                    PlanIssue::error(
                        "plan.node.skip_condition_ref",
                        path.clone().key("skip_condition"),
                        format!("reference `{reference}` must start with one of {REF_ROOTS:?}"),
                    )
                    .for_node(node.uuid.clone()),
                );
            }
        }
    }
}

fn detect_next_node_cycles(nodes: &[PlanNode], issues: &mut Vec<PlanIssue>) {
    let mut edges = BTreeMap::<&str, BTreeSet<&str>>::new();
    for node in nodes {
        let targets = edges.entry(node.uuid.as_str()).or_default();
        for adviser in &node.adviser_obtainments {
            if let Some(next) = next_node_id(&adviser.parameters) {
                targets.insert(next);
            }
        }
    }

    let mut state = BTreeMap::<&str, VisitState>::new();
    let mut reported = BTreeSet::new();
    for start in edges.keys().copied() {
        visit(start, &edges, &mut state, &mut Vec::new(), &mut reported);
    }
    for cycle in reported {
        issues.push(PlanIssue::error(
            "plan.next_node.cycle",
            IssuePath::root().key("nodes"),
            format!("next-node edges form a cycle: {cycle}"),
        ));
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InProgress,
    Done,
}

fn visit<'a>(
    node: &'a str,
    edges: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    state: &mut BTreeMap<&'a str, VisitState>,
    stack: &mut Vec<&'a str>,
    reported: &mut BTreeSet<String>,
) {
    match state.get(node) {
        Some(VisitState::Done) => return,
        Some(VisitState::InProgress) => {
            if let Some(position) = stack.iter().position(|entry| *entry == node) {
                let mut cycle = stack[position..].to_vec();
                cycle.push(node);
                reported.insert(cycle.join(" -> "));
            }
            return;
        }
        None => {}
    }
    state.insert(node, VisitState::InProgress);
    stack.push(node);
    if let Some(targets) = edges.get(node) {
        for target in targets {
            visit(*target, edges, state, stack, reported);
        }
    }
    stack.pop();
    state.insert(node, VisitState::Done);
}

fn next_node_id(parameters: &Value) -> Option<&str> {
    parameters.get("next_node_id").and_then(Value::as_str)
}

/// Child references use the `child_node_id` / `children` parameter convention of structural steps.
fn child_node_ids(parameters: &Value) -> Vec<&str> {
    let mut out = Vec::new();
    if let Some(child) = parameters.get("child_node_id").and_then(Value::as_str) {
        out.push(child);
    }
    if let Some(children) = parameters.get("children").and_then(Value::as_array) {
        out.extend(children.iter().filter_map(Value::as_str));
    }
    out
}

fn node_path(index: usize) -> IssuePath {
    IssuePath::root().key("nodes").index(index)
}

#[cfg(test)]
#[path = "validate_test.rs"]
mod tests;
