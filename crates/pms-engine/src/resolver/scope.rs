use pms_core::{Ambiance, StepCategory};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Where a published output becomes visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputScope {
    /// Siblings of the producing node and everything below them.
    #[default]
    Step,
    /// The nearest enclosing stage.
    Stage,
    /// The whole execution.
    Pipeline,
    /// The nearest enclosing level in the named group.
    Group(String),
}

impl Display for OutputScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputScope::Step => f.write_str("STEP"),
            OutputScope::Stage => f.write_str("STAGE"),
            OutputScope::Pipeline => f.write_str("PIPELINE"),
            OutputScope::Group(group) => write!(f, "GROUP({group})"),
        }
    }
}

const SEPARATOR: &str = "|";

/// Scope keys for every prefix of the level stack: `["", "r1", "r1|r2", ...]`.
pub fn prepare_level_runtime_id_indices(ambiance: &Ambiance) -> Vec<String> {
    let mut out = Vec::with_capacity(ambiance.depth() + 1);
    out.push(String::new());
    let mut current = String::new();
    for level in ambiance.levels() {
        if !current.is_empty() {
            current.push_str(SEPARATOR);
        }
        current.push_str(&level.runtime_id);
        out.push(current.clone());
    }
    out
}

/// Scope key an output published from `ambiance` under `scope` is stored at.
pub fn scope_key(ambiance: &Ambiance, scope: &OutputScope) -> Option<String> {
    let indices = prepare_level_runtime_id_indices(ambiance);
    let depth = match scope {
        OutputScope::Pipeline => 0,
        OutputScope::Step => ambiance.depth().saturating_sub(1),
        OutputScope::Stage => {
            ambiance
                .levels()
                .iter()
                .rposition(|level| level.step_type.category == StepCategory::Stage)?
                + 1
        }
        OutputScope::Group(group) => ambiance.nearest_level_in_group(group)?.0 + 1,
    };
    indices.get(depth).cloned()
}

#[cfg(test)]
#[path = "scope_test.rs"]
mod tests;
