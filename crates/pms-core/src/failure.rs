use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    Unknown,
    Application,
    Timeout,
    Connectivity,
    Authentication,
    Authorization,
    Verification,
    PolicyEvaluation,
    Configuration,
    Expression,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub failure_types: BTreeSet<FailureType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl FailureInfo {
    pub fn new(message: impl Into<String>, failure_type: FailureType) -> Self {
        let mut failure_types = BTreeSet::new();
        failure_types.insert(failure_type);
        Self {
            message: message.into(),
            failure_types,
            code: None,
        }
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::new(message, FailureType::Application)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message, FailureType::Timeout)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// An empty filter matches every failure.
    pub fn matches_any(&self, filter: &BTreeSet<FailureType>) -> bool {
        filter.is_empty() || self.failure_types.iter().any(|kind| filter.contains(kind))
    }
}
