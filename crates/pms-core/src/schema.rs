use crate::issues::{IssuePath, PlanIssue};
use jsonschema::JSONSchema;
use serde_json::Value;

pub const SCHEMA_PLAN_0_0_1: &str = "pms-plan/0.0.1";

const PLAN_SCHEMA: &str = include_str!("../schemas/plan.schema.json");

pub fn embedded_schema(schema_id: &str) -> Option<&'static str> {
    match schema_id {
        SCHEMA_PLAN_0_0_1 => Some(PLAN_SCHEMA),
        _ => None,
    }
}

pub fn validate_schema_instance(schema_id: &str, instance: &Value) -> Vec<PlanIssue> {
    let Some(schema) = embedded_schema(schema_id) else {
        return vec![schema_issue(
            IssuePath::root(),
            format!("unknown schema id: {schema_id}"),
        )];
    };

    let schema_json: Value = match serde_json::from_str(schema) {
        Ok(value) => value,
        Err(error) => {
            return vec![schema_issue(
                IssuePath::root(),
                format!("embedded schema json parse failed: {error}"),
            )];
        }
    };

    let compiled = match JSONSchema::options().compile(&schema_json) {
        Ok(compiled) => compiled,
        Err(error) => {
            return vec![schema_issue(
                IssuePath::root(),
                format!("schema compile failed for {schema_id}: {error}"),
            )];
        }
    };

    let mut issues = Vec::new();
    if let Err(errors) = compiled.validate(instance) {
        for error in errors {
            issues.push(schema_issue(
                IssuePath::from_json_pointer(error.instance_path.to_string().as_str()),
                error.to_string(),
            ));
        }
    }
    PlanIssue::sort_stable(&mut issues);
    issues
}

fn schema_issue(path: IssuePath, message: String) -> PlanIssue {
    PlanIssue::error("schema_error", path, message)
}

#[cfg(test)]
#[path = "schema_test.rs"]
mod tests;
