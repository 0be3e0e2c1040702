use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepCategory {
    Pipeline,
    Stage,
    StepGroup,
    Step,
    Strategy,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepType {
    #[serde(rename = "type")]
    pub type_name: String,
    pub category: StepCategory,
}

impl StepType {
    pub fn new(type_name: impl Into<String>, category: StepCategory) -> Self {
        Self {
            type_name: type_name.into(),
            category,
        }
    }

    pub fn step(type_name: impl Into<String>) -> Self {
        Self::new(type_name, StepCategory::Step)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub runtime_id: String,
    pub setup_id: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub step_type: StepType,
    #[serde(default)]
    pub start_ts: i64,
    #[serde(default)]
    pub retry_index: u32,
    #[serde(default)]
    pub skip_expression_chain: bool,
}

impl Level {
    pub fn new(
        runtime_id: impl Into<String>,
        setup_id: impl Into<String>,
        identifier: impl Into<String>,
        step_type: StepType,
    ) -> Self {
        Self {
            runtime_id: runtime_id.into(),
            setup_id: setup_id.into(),
            identifier: identifier.into(),
            group: None,
            step_type,
            start_ts: 0,
            retry_index: 0,
            skip_expression_chain: false,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_start_ts(mut self, start_ts: i64) -> Self {
        self.start_ts = start_ts;
        self
    }

    pub fn with_retry_index(mut self, retry_index: u32) -> Self {
        self.retry_index = retry_index;
        self
    }

    pub fn with_skip_expression_chain(mut self, skip: bool) -> Self {
        self.skip_expression_chain = skip;
        self
    }
}
