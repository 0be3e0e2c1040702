use super::level::{Level, StepCategory, StepType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const SETUP_ACCOUNT_ID: &str = "accountId";
pub const SETUP_ORG_IDENTIFIER: &str = "orgIdentifier";
pub const SETUP_PROJECT_IDENTIFIER: &str = "projectIdentifier";

const PARALLEL_IDENTIFIER: &str = "parallel";

/// Position of a unit of work inside an execution tree.
///
/// Levels are shared between clones; extending an ambiance copies the level
/// list once and never touches the list seen by siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiance {
    pub plan_execution_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub setup_abstractions: BTreeMap<String, String>,
    #[serde(default = "empty_levels")]
    levels: Arc<[Level]>,
}

fn empty_levels() -> Arc<[Level]> {
    Arc::from(Vec::new())
}

impl Ambiance {
    pub fn new(plan_execution_id: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            plan_id: plan_id.into(),
            setup_abstractions: BTreeMap::new(),
            levels: empty_levels(),
        }
    }

    pub fn with_setup_abstractions(mut self, setup_abstractions: BTreeMap<String, String>) -> Self {
        self.setup_abstractions = setup_abstractions;
        self
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn clone_for_child(&self, level: Level) -> Self {
        let mut levels = Vec::with_capacity(self.levels.len() + 1);
        levels.extend(self.levels.iter().cloned());
        levels.push(level);
        Self {
            plan_execution_id: self.plan_execution_id.clone(),
            plan_id: self.plan_id.clone(),
            setup_abstractions: self.setup_abstractions.clone(),
            levels: Arc::from(levels),
        }
    }

    /// Drops the current level, yielding the context the current node was started in.
    pub fn clone_for_finish(&self) -> Self {
        self.clone_to_depth(self.levels.len().saturating_sub(1))
    }

    pub fn clone_to_depth(&self, depth: usize) -> Self {
        let keep = depth.min(self.levels.len());
        Self {
            plan_execution_id: self.plan_execution_id.clone(),
            plan_id: self.plan_id.clone(),
            setup_abstractions: self.setup_abstractions.clone(),
            levels: Arc::from(self.levels[..keep].to_vec()),
        }
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    pub fn current_runtime_id(&self) -> Option<&str> {
        self.current_level().map(|level| level.runtime_id.as_str())
    }

    pub fn current_setup_id(&self) -> Option<&str> {
        self.current_level().map(|level| level.setup_id.as_str())
    }

    pub fn step_identifier(&self) -> Option<&str> {
        self.current_level().map(|level| level.identifier.as_str())
    }

    pub fn current_step_type(&self) -> Option<&StepType> {
        self.current_level().map(|level| &level.step_type)
    }

    pub fn current_group(&self) -> Option<&str> {
        self.current_level().and_then(|level| level.group.as_deref())
    }

    pub fn current_level_start_ts(&self) -> Option<i64> {
        self.current_level().map(|level| level.start_ts)
    }

    pub fn parent_runtime_id(&self) -> Option<&str> {
        let len = self.levels.len();
        if len < 2 {
            return None;
        }
        Some(self.levels[len - 2].runtime_id.as_str())
    }

    pub fn stage_level(&self) -> Option<&Level> {
        self.levels
            .iter()
            .rev()
            .find(|level| level.step_type.category == StepCategory::Stage)
    }

    pub fn nearest_level_in_group(&self, group: &str) -> Option<(usize, &Level)> {
        self.levels
            .iter()
            .enumerate()
            .rev()
            .find(|(_, level)| level.group.as_deref() == Some(group))
    }

    pub fn account_id(&self) -> Option<&str> {
        self.setup_abstractions.get(SETUP_ACCOUNT_ID).map(String::as_str)
    }

    pub fn org_identifier(&self) -> Option<&str> {
        self.setup_abstractions
            .get(SETUP_ORG_IDENTIFIER)
            .map(String::as_str)
    }

    pub fn project_identifier(&self) -> Option<&str> {
        self.setup_abstractions
            .get(SETUP_PROJECT_IDENTIFIER)
            .map(String::as_str)
    }

    pub fn fqn(&self) -> String {
        self.levels
            .iter()
            .filter(|level| !level.skip_expression_chain && level.identifier != PARALLEL_IDENTIFIER)
            .map(|level| level.identifier.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

#[cfg(test)]
#[path = "context_test.rs"]
mod tests;
