use super::types::{Plan, PlanNode};
use super::validate::validate_plan_nodes;
use crate::issues::{IssuePath, PlanIssue};
use crate::schema::{validate_schema_instance, SCHEMA_PLAN_0_0_1};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanDocument {
    pub schema: String,
    pub plan_id: String,
    pub starting_node_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub setup_abstractions: BTreeMap<String, String>,
    pub nodes: Vec<PlanNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Auto,
    Json,
    Yaml,
}

impl PlanDocument {
    pub fn validate(&self) -> Vec<PlanIssue> {
        let mut issues = validate_plan_nodes(&self.starting_node_id, &self.nodes);
        if self.schema != SCHEMA_PLAN_0_0_1 {
            issues.push(PlanIssue::error(
                "plan.schema",
                IssuePath::root().key("schema"),
                format!(
                    "unsupported plan schema `{}` (expected `{SCHEMA_PLAN_0_0_1}`)",
                    self.schema
                ),
            ));
        }
        PlanIssue::sort_stable(&mut issues);
        issues
    }

    pub fn into_plan(self) -> Result<Plan, Vec<PlanIssue>> {
        let mut issues = self.validate();
        issues.retain(PlanIssue::is_error);
        if !issues.is_empty() {
            return Err(issues);
        }
        Ok(Plan::new(self.plan_id, self.starting_node_id, self.nodes)?
            .with_setup_abstractions(self.setup_abstractions))
    }
}

/// Decodes a plan document after checking it against the embedded plan schema.
pub fn parse_plan_document(input: &str, format: DocumentFormat) -> Result<PlanDocument, Vec<PlanIssue>> {
    let value = decode_value(input, format)?;
    let issues = validate_schema_instance(SCHEMA_PLAN_0_0_1, &value);
    if !issues.is_empty() {
        return Err(issues);
    }
    serde_json::from_value::<PlanDocument>(value).map_err(|error| {
        vec![PlanIssue::error(
            "plan.decode",
            IssuePath::root(),
            format!("plan document decode failed: {error}"),
        )]
    })
}

fn decode_value(input: &str, format: DocumentFormat) -> Result<Value, Vec<PlanIssue>> {
    let parse_error = |message: String| vec![PlanIssue::error("plan.parse", IssuePath::root(), message)];
    match format {
        DocumentFormat::Json => serde_json::from_str::<Value>(input)
            .map_err(|error| parse_error(format!("json decode error: {error}"))),
        DocumentFormat::Yaml => serde_yaml::from_str::<Value>(input)
            .map_err(|error| parse_error(format!("yaml decode error: {error}"))),
        DocumentFormat::Auto => serde_json::from_str::<Value>(input).or_else(|_| {
            serde_yaml::from_str::<Value>(input)
                .map_err(|error| parse_error(format!("document is neither json nor yaml: {error}")))
        }),
    }
}

#[cfg(test)]
#[path = "document_test.rs"]
mod tests;
