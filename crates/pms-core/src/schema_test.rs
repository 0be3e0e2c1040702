use super::{embedded_schema, validate_schema_instance, SCHEMA_PLAN_0_0_1};
use serde_json::json;

#[test]
fn plan_schema_is_embedded() {
    let schema = embedded_schema(SCHEMA_PLAN_0_0_1).expect("schema must exist");
    assert!(schema.contains("pms-plan/0.0.1"));
    assert!(embedded_schema("pms-unknown/1").is_none());
}

#[test]
fn minimal_plan_passes_schema() {
    let instance = json!({
        "schema": "pms-plan/0.0.1",
        "plan_id": "plan-1",
        "starting_node_id": "a",
        "nodes": [{
            "uuid": "a",
            "name": "A",
            "identifier": "a",
            "step_type": {"type": "NOOP", "category": "STEP"},
            "facilitator_obtainments": [{"type": "SYNC"}]
        }]
    });
    assert!(validate_schema_instance(SCHEMA_PLAN_0_0_1, &instance).is_empty());
}

#[test]
fn schema_errors_point_at_the_offending_field() {
    let instance = json!({
        "schema": "pms-plan/0.0.1",
        "plan_id": "plan-1",
        "starting_node_id": "a",
        "nodes": [{
            "uuid": "a",
            "name": "A",
            "identifier": "a",
            "step_type": {"type": "NOOP", "category": "TASK"},
            "facilitator_obtainments": []
        }]
    });
    let issues = validate_schema_instance(SCHEMA_PLAN_0_0_1, &instance);
    assert!(!issues.is_empty());
    assert!(issues
        .iter()
        .any(|issue| issue.path.to_string() == "$.nodes[0].step_type.category"));
}

#[test]
fn unknown_schema_id_is_reported() {
    let issues = validate_schema_instance("pms-unknown/1", &json!({}));
    assert_eq!(issues.len(), 1);
    assert!(issues[0].message.contains("unknown schema id"));
}
