use super::{IssuePath, IssueSeverity, PlanIssue};

#[test]
fn sort_stable_puts_errors_first_then_kind() {
    let mut issues = vec![
        PlanIssue::warning("plan.cycle", IssuePath::root(), "w"),
        PlanIssue::error("plan.starting_node", IssuePath::root(), "b"),
        PlanIssue::error("plan.duplicate_uuid", IssuePath::root().key("nodes").index(1), "a"),
    ];
    PlanIssue::sort_stable(&mut issues);
    let kinds = issues.iter().map(|issue| issue.kind.as_str()).collect::<Vec<_>>();
    assert_eq!(kinds, vec!["plan.duplicate_uuid", "plan.starting_node", "plan.cycle"]);
    assert_eq!(issues[2].severity, IssueSeverity::Warning);
}

#[test]
fn path_renders_like_json_path() {
    let path = IssuePath::root().key("nodes").index(2).key("identifier");
    assert_eq!(path.to_string(), "$.nodes[2].identifier");
    assert_eq!(IssuePath::root().to_string(), "$");
}

#[test]
fn json_pointer_decodes_escapes_and_indices() {
    let path = IssuePath::from_json_pointer("/nodes/0/step_parameters/a~1b");
    assert_eq!(path.to_string(), "$.nodes[0].step_parameters.a/b");
    assert_eq!(IssuePath::from_json_pointer(""), IssuePath::root());
}

#[test]
fn display_includes_kind_and_path() {
    let issue = PlanIssue::error("plan.node.facilitators", IssuePath::root().key("nodes"), "missing")
        .for_node("a");
    assert_eq!(issue.to_string(), "error [plan.node.facilitators] $.nodes: missing");
    assert_eq!(issue.node_id.as_deref(), Some("a"));
}
