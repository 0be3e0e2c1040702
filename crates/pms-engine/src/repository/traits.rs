use super::store::RepositoryError;
use crate::execution::{Interrupt, NodeExecution, PlanExecution};
use crate::resolver::OutputInstance;
use crate::timeout::TimeoutInstance;
use pms_core::{Plan, RefType, Status};
use std::sync::Arc;

pub trait PlanRepository: Send + Sync {
    /// Stores a plan. Saving an identical plan again is a no-op; a different plan
    /// under the same id is rejected.
    fn save_plan(&self, plan: Plan) -> Result<Arc<Plan>, RepositoryError>;
    fn find_plan(&self, plan_id: &str) -> Result<Option<Arc<Plan>>, RepositoryError>;
}

pub trait PlanExecutionRepository: Send + Sync {
    fn save(&self, execution: PlanExecution) -> Result<PlanExecution, RepositoryError>;
    fn find_by_id(&self, id: &str) -> Result<Option<PlanExecution>, RepositoryError>;
    fn find_all(&self) -> Result<Vec<PlanExecution>, RepositoryError>;
    fn compare_and_swap(&self, execution: PlanExecution) -> Result<PlanExecution, RepositoryError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParentFilter {
    #[default]
    Any,
    TopLevel,
    Of(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeExecutionCriteria {
    pub plan_execution_id: Option<String>,
    pub parent: ParentFilter,
    pub plan_node_id: Option<String>,
    pub statuses: Option<Vec<Status>>,
    pub include_old_retries: bool,
}

impl NodeExecutionCriteria {
    pub fn for_plan_execution(plan_execution_id: impl Into<String>) -> Self {
        Self {
            plan_execution_id: Some(plan_execution_id.into()),
            ..Self::default()
        }
    }

    pub fn top_level(mut self) -> Self {
        self.parent = ParentFilter::TopLevel;
        self
    }

    pub fn children_of(mut self, parent_id: impl Into<String>) -> Self {
        self.parent = ParentFilter::Of(parent_id.into());
        self
    }

    pub fn with_plan_node(mut self, plan_node_id: impl Into<String>) -> Self {
        self.plan_node_id = Some(plan_node_id.into());
        self
    }

    pub fn with_statuses(mut self, statuses: &[Status]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn including_old_retries(mut self) -> Self {
        self.include_old_retries = true;
        self
    }

    pub fn matches(&self, node: &NodeExecution) -> bool {
        if let Some(plan_execution_id) = &self.plan_execution_id {
            if &node.plan_execution_id != plan_execution_id {
                return false;
            }
        }
        let parent_matches = match &self.parent {
            ParentFilter::Any => true,
            ParentFilter::TopLevel => node.parent_id.is_none(),
            ParentFilter::Of(parent_id) => node.parent_id.as_deref() == Some(parent_id.as_str()),
        };
        if !parent_matches {
            return false;
        }
        if let Some(plan_node_id) = &self.plan_node_id {
            if &node.plan_node_id != plan_node_id {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&node.status) {
                return false;
            }
        }
        self.include_old_retries || !node.old_retry
    }
}

pub trait NodeExecutionRepository: Send + Sync {
    fn save(&self, node: NodeExecution) -> Result<NodeExecution, RepositoryError>;
    fn find_by_id(&self, id: &str) -> Result<Option<NodeExecution>, RepositoryError>;
    /// Results are ordered by start time, then id.
    fn find_all(&self, criteria: &NodeExecutionCriteria) -> Result<Vec<NodeExecution>, RepositoryError>;
    /// The node currently waiting on `correlation_id`, if any.
    fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<NodeExecution>, RepositoryError>;
    fn compare_and_swap(&self, node: NodeExecution) -> Result<NodeExecution, RepositoryError>;
}

pub trait InterruptRepository: Send + Sync {
    fn save(&self, interrupt: Interrupt) -> Result<Interrupt, RepositoryError>;
    fn find_by_id(&self, id: &str) -> Result<Option<Interrupt>, RepositoryError>;
    fn find_by_plan_execution(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>, RepositoryError>;
    fn compare_and_swap(&self, interrupt: Interrupt) -> Result<Interrupt, RepositoryError>;
}

pub trait TimeoutInstanceRepository: Send + Sync {
    fn save(&self, instance: TimeoutInstance) -> Result<TimeoutInstance, RepositoryError>;
    fn find_by_id(&self, id: &str) -> Result<Option<TimeoutInstance>, RepositoryError>;
    fn find_all(&self) -> Result<Vec<TimeoutInstance>, RepositoryError>;
    fn find_by_node_execution(&self, node_execution_id: &str) -> Result<Vec<TimeoutInstance>, RepositoryError>;
    fn compare_and_swap(&self, instance: TimeoutInstance) -> Result<TimeoutInstance, RepositoryError>;
    /// Returns whether an instance was removed; concurrent deleters see `false`.
    fn delete(&self, id: &str) -> Result<bool, RepositoryError>;
}

pub trait OutputRepository: Send + Sync {
    /// Fails with `AlreadyExists` when the name is taken in the same scope.
    fn insert(&self, output: OutputInstance) -> Result<OutputInstance, RepositoryError>;
    /// Explicit overwrite; replaces whatever is stored under the same scope and name.
    fn overwrite(&self, output: OutputInstance) -> Result<OutputInstance, RepositoryError>;
    fn find(
        &self,
        plan_execution_id: &str,
        ref_type: RefType,
        level_runtime_id_idx: &str,
        name: &str,
    ) -> Result<Option<OutputInstance>, RepositoryError>;
    fn find_by_plan_execution(&self, plan_execution_id: &str) -> Result<Vec<OutputInstance>, RepositoryError>;
}
