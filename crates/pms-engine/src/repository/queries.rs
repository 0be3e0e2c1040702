use super::store::{cas_update, RepositoryError};
use super::traits::{
    InterruptRepository, NodeExecutionCriteria, NodeExecutionRepository, PlanExecutionRepository,
};
use crate::execution::{Interrupt, NodeExecution, PlanExecution};
use pms_core::{FailureInfo, Status};
use std::collections::VecDeque;

pub fn update_node_execution<T>(
    repository: &dyn NodeExecutionRepository,
    id: &str,
    retry_limit: usize,
    mutate: impl FnMut(&mut NodeExecution) -> Option<T>,
) -> Result<Option<(NodeExecution, T)>, RepositoryError> {
    cas_update(
        "node_execution",
        id,
        retry_limit,
        |id| repository.find_by_id(id),
        |node| repository.compare_and_swap(node),
        mutate,
    )
}

pub fn update_plan_execution<T>(
    repository: &dyn PlanExecutionRepository,
    id: &str,
    retry_limit: usize,
    mutate: impl FnMut(&mut PlanExecution) -> Option<T>,
) -> Result<Option<(PlanExecution, T)>, RepositoryError> {
    cas_update(
        "plan_execution",
        id,
        retry_limit,
        |id| repository.find_by_id(id),
        |execution| repository.compare_and_swap(execution),
        mutate,
    )
}

pub fn update_interrupt<T>(
    repository: &dyn InterruptRepository,
    id: &str,
    retry_limit: usize,
    mutate: impl FnMut(&mut Interrupt) -> Option<T>,
) -> Result<Option<(Interrupt, T)>, RepositoryError> {
    cas_update(
        "interrupt",
        id,
        retry_limit,
        |id| repository.find_by_id(id),
        |interrupt| repository.compare_and_swap(interrupt),
        mutate,
    )
}

pub fn require_node_execution(
    repository: &dyn NodeExecutionRepository,
    id: &str,
) -> Result<NodeExecution, RepositoryError> {
    repository.find_by_id(id)?.ok_or_else(|| RepositoryError::NotFound {
        collection: "node_execution",
        id: id.to_string(),
    })
}

pub fn require_plan_execution(
    repository: &dyn PlanExecutionRepository,
    id: &str,
) -> Result<PlanExecution, RepositoryError> {
    repository.find_by_id(id)?.ok_or_else(|| RepositoryError::NotFound {
        collection: "plan_execution",
        id: id.to_string(),
    })
}

/// Every descendant of `node_execution_id` (children, their chains, and so on),
/// skipping attempts superseded by a retry. Breadth-first order.
pub fn find_descendants(
    repository: &dyn NodeExecutionRepository,
    plan_execution_id: &str,
    node_execution_id: &str,
) -> Result<Vec<NodeExecution>, RepositoryError> {
    let mut out = Vec::new();
    let mut frontier = VecDeque::from([node_execution_id.to_string()]);
    while let Some(parent_id) = frontier.pop_front() {
        let children = repository
            .find_all(&NodeExecutionCriteria::for_plan_execution(plan_execution_id).children_of(parent_id))?;
        for child in children {
            frontier.push_back(child.uuid.clone());
            out.push(child);
        }
    }
    Ok(out)
}

pub fn active_node_executions(
    repository: &dyn NodeExecutionRepository,
    plan_execution_id: &str,
) -> Result<Vec<NodeExecution>, RepositoryError> {
    repository.find_all(
        &NodeExecutionCriteria::for_plan_execution(plan_execution_id)
            .with_statuses(Status::non_final_statuses()),
    )
}

/// Marks every non-final node of an execution ERRORED. Returns the nodes it changed,
/// each with the task ids it was still waiting on.
pub fn error_out_active_nodes(
    repository: &dyn NodeExecutionRepository,
    plan_execution_id: &str,
    retry_limit: usize,
    failure_info: &FailureInfo,
    now_ms: i64,
) -> Result<Vec<(NodeExecution, Vec<String>)>, RepositoryError> {
    let mut changed = Vec::new();
    for node in active_node_executions(repository, plan_execution_id)? {
        let updated = update_node_execution(repository, &node.uuid, retry_limit, |node| {
            if !node.status.can_transition_to(Status::Errored) {
                return None;
            }
            node.status = Status::Errored;
            node.end_ts = Some(now_ms);
            node.failure_info = Some(failure_info.clone());
            Some(node.waiting.take().map(|waiting| waiting.task_ids).unwrap_or_default())
        })?;
        if let Some(errored) = updated {
            changed.push(errored);
        }
    }
    Ok(changed)
}

#[cfg(test)]
#[path = "queries_test.rs"]
mod tests;
