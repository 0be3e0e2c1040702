use crate::ambiance::StepType;
use crate::expression::Expression;
use crate::issues::PlanIssue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviserObtainment {
    #[serde(rename = "type")]
    pub adviser_type: String,
    #[serde(default)]
    pub parameters: Value,
}

impl AdviserObtainment {
    pub fn new(adviser_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            adviser_type: adviser_type.into(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitatorObtainment {
    #[serde(rename = "type")]
    pub facilitator_type: String,
    #[serde(default)]
    pub parameters: Value,
}

impl FacilitatorObtainment {
    pub fn new(facilitator_type: impl Into<String>) -> Self {
        Self {
            facilitator_type: facilitator_type.into(),
            parameters: Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutObtainment {
    pub dimension: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefType {
    SweepingOutput,
    Outcome,
}

impl RefType {
    pub fn registry_key(self) -> &'static str {
        match self {
            RefType::SweepingOutput => "SWEEPING_OUTPUT",
            RefType::Outcome => "OUTCOME",
        }
    }
}

/// A named step input bound to a previously published output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefObject {
    pub name: String,
    pub key: String,
    pub ref_type: RefType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipType {
    #[default]
    Noop,
    SkipNode,
    SkipTree,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanNode {
    pub uuid: String,
    pub name: String,
    pub identifier: String,
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub step_parameters: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ref_objects: Vec<RefObject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adviser_obtainments: Vec<AdviserObtainment>,
    #[serde(default)]
    pub facilitator_obtainments: Vec<FacilitatorObtainment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeout_obtainments: Vec<TimeoutObtainment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_condition: Option<Expression>,
    #[serde(default)]
    pub skip_expression_chain: bool,
    #[serde(default)]
    pub skip_graph_type: SkipType,
}

impl PlanNode {
    pub fn new(uuid: impl Into<String>, identifier: impl Into<String>, step_type: StepType) -> Self {
        let identifier = identifier.into();
        Self {
            uuid: uuid.into(),
            name: identifier.clone(),
            identifier,
            step_type,
            group: None,
            step_parameters: Value::Null,
            ref_objects: Vec::new(),
            adviser_obtainments: Vec::new(),
            facilitator_obtainments: Vec::new(),
            timeout_obtainments: Vec::new(),
            skip_condition: None,
            skip_expression_chain: false,
            skip_graph_type: SkipType::Noop,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.step_parameters = parameters;
        self
    }

    pub fn with_facilitator(mut self, obtainment: FacilitatorObtainment) -> Self {
        self.facilitator_obtainments.push(obtainment);
        self
    }

    pub fn with_adviser(mut self, obtainment: AdviserObtainment) -> Self {
        self.adviser_obtainments.push(obtainment);
        self
    }

    pub fn with_timeout(mut self, dimension: impl Into<String>, timeout_ms: u64) -> Self {
        self.timeout_obtainments.push(TimeoutObtainment {
            dimension: dimension.into(),
            timeout_ms,
        });
        self
    }

    pub fn with_ref_object(mut self, ref_object: RefObject) -> Self {
        self.ref_objects.push(ref_object);
        self
    }

    pub fn with_skip_condition(mut self, condition: Expression) -> Self {
        self.skip_condition = Some(condition);
        self
    }
}

/// Immutable node graph shared read-only by every execution of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub uuid: String,
    pub starting_node_id: String,
    #[serde(default)]
    pub setup_abstractions: BTreeMap<String, String>,
    nodes: BTreeMap<String, PlanNode>,
}

impl Plan {
    /// Builds a plan, rejecting it when validation reports any error.
    pub fn new(
        uuid: impl Into<String>,
        starting_node_id: impl Into<String>,
        nodes: Vec<PlanNode>,
    ) -> Result<Self, Vec<PlanIssue>> {
        let uuid = uuid.into();
        let starting_node_id = starting_node_id.into();
        let mut issues = super::validate::validate_plan_nodes(&starting_node_id, &nodes);
        issues.retain(PlanIssue::is_error);
        if !issues.is_empty() {
            PlanIssue::sort_stable(&mut issues);
            return Err(issues);
        }
        let nodes = nodes
            .into_iter()
            .map(|node| (node.uuid.clone(), node))
            .collect::<BTreeMap<_, _>>();
        Ok(Self {
            uuid,
            starting_node_id,
            setup_abstractions: BTreeMap::new(),
            nodes,
        })
    }

    pub fn with_setup_abstractions(mut self, setup_abstractions: BTreeMap<String, String>) -> Self {
        self.setup_abstractions = setup_abstractions;
        self
    }

    pub fn node(&self, uuid: &str) -> Option<&PlanNode> {
        self.nodes.get(uuid)
    }

    pub fn starting_node(&self) -> Option<&PlanNode> {
        self.nodes.get(&self.starting_node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
