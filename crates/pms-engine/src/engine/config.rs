use serde::{Deserialize, Serialize};

/// How the engine picks among several facilitator or adviser obtainments that all match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Declaration order decides; the first match wins.
    #[default]
    FirstMatch,
    /// More than one match is a configuration error for the execution.
    ExactlyOne,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub match_policy: MatchPolicy,
    pub cas_retry_limit: usize,
    /// Concurrency applied to CHILDREN nodes that do not set their own limit.
    pub default_children_concurrency: Option<usize>,
    pub max_signal_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_policy: MatchPolicy::FirstMatch,
            cas_retry_limit: 16,
            default_children_concurrency: None,
            max_signal_iterations: 10_000,
        }
    }
}
