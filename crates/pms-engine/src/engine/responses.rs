use super::config::MatchPolicy;
use super::error::EngineError;
use super::orchestration::OrchestrationEngine;
use super::signal::{EngineSignal, NodeStart};
use crate::adviser::{repair_response, AdviserError, AdviserResponse, AdvisingEvent, RepairAction};
use crate::events::{OrchestrationEvent, OrchestrationEventType};
use crate::execution::{NodeExecution, WaitKind, WaitState};
use crate::repository::{active_node_executions, error_out_active_nodes, NodeExecutionCriteria};
use crate::resolver::ResolverError;
use crate::step::{ChildOutcome, StepError, StepResponse, TaskChainLink};
use crate::task::ResponseData;
use crate::timeout::{TimeoutCallback, ABSOLUTE_TIMEOUT};
use pms_core::{calculate_status, FailureInfo, FailureType, PlanNode, RefType, Status};
use serde_json::Value;
use std::cmp::Reverse;
use tracing::{debug, info, warn};

/// What happens after a node reaches its final status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Continuation {
    /// Start the named sibling next.
    Next(String),
    /// The chain ends here; the parent (or the plan) is told.
    ChainEnd,
    /// Nothing follows; the caller handles the surroundings.
    Silent,
}

impl Continuation {
    fn next_or_end(next_node_id: Option<String>) -> Self {
        next_node_id.map_or(Continuation::ChainEnd, Continuation::Next)
    }
}

enum ChainProgress {
    Done(StepResponse),
    Next(TaskChainLink),
}

impl OrchestrationEngine {
    /// Hands the collected responses of a finished wait back to the step.
    pub(super) fn continue_waiting(&self, node_execution_id: &str) -> Result<(), EngineError> {
        let resumed = self.update_node(node_execution_id, |node| {
            if !matches!(node.status, Status::AsyncWaiting | Status::TaskWaiting) {
                return None;
            }
            let waiting = node.waiting.take()?;
            if !waiting.is_complete() {
                return None;
            }
            node.status = Status::Running;
            Some(waiting)
        })?;
        let Some((node, waiting)) = resumed else {
            return Ok(());
        };

        let progress = match waiting.kind {
            WaitKind::Async => self
                .call_step(&node, |step, ctx| {
                    step.handle_async_response(ctx, &waiting.responses)
                        .unwrap_or_else(StepError::into_response)
                })?
                .map(ChainProgress::Done),
            WaitKind::Task => {
                let response = task_response(&waiting);
                self.call_step(&node, |step, ctx| {
                    step.handle_task_result(ctx, &response)
                        .unwrap_or_else(StepError::into_response)
                })?
                .map(ChainProgress::Done)
            }
            WaitKind::TaskChain => {
                let response = task_response(&waiting);
                self.call_step(&node, |step, ctx| {
                    if waiting.chain_end || !response.is_success() {
                        return ChainProgress::Done(
                            step.finalize_chain(ctx, &response, &waiting.pass_through)
                                .unwrap_or_else(StepError::into_response),
                        );
                    }
                    match step.next_chain_link(ctx, &response, &waiting.pass_through) {
                        Ok(link) => ChainProgress::Next(link),
                        Err(error) => ChainProgress::Done(error.into_response()),
                    }
                })?
            }
            WaitKind::Timed => self
                .call_step(&node, |step, ctx| {
                    step.finish_wait(ctx).unwrap_or_else(StepError::into_response)
                })?
                .map(ChainProgress::Done),
        };

        match progress {
            Ok(ChainProgress::Done(response)) => self.process_step_response(&node.uuid, response),
            Ok(ChainProgress::Next(link)) => self.dispatch_task(&node, WaitKind::TaskChain, link),
            Err(failure) => self.process_step_response(&node.uuid, StepResponse::failed(failure)),
        }
    }

    /// Publishes the response's outputs and advises on its status.
    pub(super) fn process_step_response(
        &self,
        node_execution_id: &str,
        response: StepResponse,
    ) -> Result<(), EngineError> {
        let node = self.load_node(node_execution_id)?;
        if node.status.is_terminal() {
            debug!(node_execution_id, "response for finished node ignored");
            return Ok(());
        }
        if node.status == Status::Paused {
            self.update_node(node_execution_id, |node| {
                let hold = node.status == Status::Paused && node.pending_response.is_none();
                hold.then(|| node.pending_response = Some(response.clone()))
            })?;
            debug!(node_execution_id, "response held until resume");
            return Ok(());
        }

        let skipped_outside_queue = response.status == Status::Skipped && node.status != Status::Queued;
        if !response.status.is_terminal() || skipped_outside_queue {
            return self.advise(
                &node,
                Status::Errored,
                Some(FailureInfo::new(
                    format!("step `{}` answered with status {}", node.identifier, response.status),
                    FailureType::Configuration,
                )),
            );
        }

        match self.publish_outputs(&node, &response) {
            Ok(()) => {}
            Err(EngineError::Resolver(
                error @ (ResolverError::Duplicate { .. } | ResolverError::ScopeUnavailable { .. }),
            )) => {
                return self.advise(
                    &node,
                    Status::Errored,
                    Some(FailureInfo::new(error.to_string(), FailureType::Configuration)),
                );
            }
            Err(error) => return Err(error),
        }
        self.advise(&node, response.status, response.failure_info)
    }

    fn publish_outputs(&self, node: &NodeExecution, response: &StepResponse) -> Result<(), EngineError> {
        let groups = [
            (RefType::Outcome, &response.outcomes),
            (RefType::SweepingOutput, &response.sweeping_outputs),
        ];
        for (ref_type, outputs) in groups {
            if outputs.is_empty() {
                continue;
            }
            let resolver = self.registries.resolver(ref_type)?;
            for output in outputs {
                // A retried attempt replaces what its earlier attempts published.
                let instance = if node.retry_count() > 0 {
                    resolver.overwrite(&node.ambiance, &output.name, output.value.clone(), &output.scope)?
                } else {
                    resolver.consume(&node.ambiance, &output.name, output.value.clone(), &output.scope)?
                };
                self.publish(
                    &node.plan_execution_id,
                    OrchestrationEvent::new(OrchestrationEventType::OutputPublished)
                        .for_node(&node.uuid)
                        .with("ref_type", ref_type)
                        .with("name", &instance.name)
                        .with("scope", &output.scope)
                        .with("value", &instance.value),
                );
            }
        }
        Ok(())
    }

    /// Runs the node's advisers for `status` and applies the winning response. Without a
    /// matching adviser the node ends with `status`.
    pub(super) fn advise(
        &self,
        node: &NodeExecution,
        status: Status,
        failure_info: Option<FailureInfo>,
    ) -> Result<(), EngineError> {
        let execution = self.plan_execution(&node.plan_execution_id)?;
        let plan = self.load_plan(&execution.plan_id)?;
        let plan_node = self.plan_node(&plan, node)?;
        let Some((adviser_type, advised)) = self.select_adviser(node, plan_node, status, failure_info.as_ref())?
        else {
            return self.end_node(&node.uuid, status, failure_info, Continuation::ChainEnd);
        };
        let response = match advised {
            Ok(response) => response,
            Err(error) => {
                warn!(node_execution_id = %node.uuid, adviser = %adviser_type, error = %error, "adviser failed");
                return self.end_node(
                    &node.uuid,
                    Status::Errored,
                    Some(FailureInfo::new(error.to_string(), FailureType::Configuration)),
                    Continuation::ChainEnd,
                );
            }
        };
        if !self.record_advice(node, &adviser_type, status, &response)? {
            return Ok(());
        }
        self.apply_adviser_response(node, status, failure_info, response)
    }

    fn select_adviser(
        &self,
        node: &NodeExecution,
        plan_node: &PlanNode,
        status: Status,
        failure_info: Option<&FailureInfo>,
    ) -> Result<Option<(String, Result<AdviserResponse, AdviserError>)>, EngineError> {
        let base = AdvisingEvent {
            ambiance: &node.ambiance,
            plan_node,
            node_execution_id: &node.uuid,
            from_status: node.status,
            to_status: status,
            failure_info,
            retry_count: node.retry_count(),
            previous_advise_type: node.previous_advise_type(),
            parameters: &Value::Null,
        };
        let mut matched = Vec::new();
        for obtainment in &plan_node.adviser_obtainments {
            let adviser = self.registries.advisers.obtain(&obtainment.adviser_type)?;
            let event = AdvisingEvent {
                parameters: &obtainment.parameters,
                ..base
            };
            if !adviser.can_advise(&event) {
                continue;
            }
            matched.push((obtainment.adviser_type.clone(), adviser, event));
            if self.config.match_policy == MatchPolicy::FirstMatch {
                break;
            }
        }
        if matched.len() > 1 {
            let keys = matched.iter().map(|(key, _, _)| key.as_str()).collect::<Vec<_>>();
            return Err(EngineError::configuration(
                &node.plan_execution_id,
                format!(
                    "advisers {} all matched node `{}` ending {status}",
                    keys.join(", "),
                    node.identifier
                ),
            ));
        }
        Ok(matched
            .pop()
            .map(|(key, adviser, event)| (key, adviser.on_advise_event(&event))))
    }

    /// Stores the advice on the node. `false` when the node already ended.
    pub(super) fn record_advice(
        &self,
        node: &NodeExecution,
        source: &str,
        status: Status,
        response: &AdviserResponse,
    ) -> Result<bool, EngineError> {
        let recorded = self.update_node(&node.uuid, |node| {
            if node.status.is_terminal() {
                return None;
            }
            node.adviser_response = Some(response.clone());
            Some(())
        })?;
        if recorded.is_none() {
            return Ok(false);
        }
        debug!(
            node_execution_id = %node.uuid,
            adviser = source,
            advise_type = ?response.advise_type(),
            "adviser responded"
        );
        self.publish(
            &node.plan_execution_id,
            OrchestrationEvent::new(OrchestrationEventType::AdviserResponse)
                .for_node(&node.uuid)
                .with("adviser", source)
                .with("to_status", status)
                .with("response", response),
        );
        Ok(true)
    }

    pub(super) fn apply_adviser_response(
        &self,
        node: &NodeExecution,
        status: Status,
        failure_info: Option<FailureInfo>,
        response: AdviserResponse,
    ) -> Result<(), EngineError> {
        match response {
            AdviserResponse::NextStep { next_node_id } => {
                self.end_node(&node.uuid, status, failure_info, Continuation::Next(next_node_id))
            }
            AdviserResponse::Retry { wait_ms, attempt } => {
                self.retry_node(node, status, failure_info, wait_ms, attempt)
            }
            AdviserResponse::InterventionWait {
                timeout_ms,
                timeout_action,
            } => self.park_for_intervention(node, status, failure_info, timeout_ms, timeout_action),
            AdviserResponse::EndPlan => {
                self.end_node(&node.uuid, status, failure_info.clone(), Continuation::Silent)?;
                self.end_plan(&node.plan_execution_id, status, failure_info)
            }
            AdviserResponse::MarkSuccess { next_node_id } => self.end_node(
                &node.uuid,
                Status::Succeeded,
                None,
                Continuation::next_or_end(next_node_id),
            ),
            AdviserResponse::IgnoreFailure { next_node_id } => self.end_node(
                &node.uuid,
                Status::IgnoreFailed,
                failure_info,
                Continuation::next_or_end(next_node_id),
            ),
            AdviserResponse::MarkAsFailure => {
                let failure_info = failure_info.unwrap_or_else(|| {
                    FailureInfo::new(format!("`{}` marked as failed", node.identifier), FailureType::Unknown)
                });
                self.end_node(&node.uuid, Status::Failed, Some(failure_info), Continuation::ChainEnd)
            }
        }
    }

    /// Ends the attempt and starts a fresh node execution for the same plan node.
    pub(super) fn retry_node(
        &self,
        node: &NodeExecution,
        status: Status,
        failure_info: Option<FailureInfo>,
        wait_ms: u64,
        attempt: u32,
    ) -> Result<(), EngineError> {
        let Some(ended) = self.finish_node(&node.uuid, status, failure_info, true)? else {
            return Ok(());
        };
        let mut retry_ids = ended.retry_ids.clone();
        retry_ids.push(ended.uuid.clone());
        info!(
            node_execution_id = %ended.uuid,
            identifier = %ended.identifier,
            attempt,
            wait_ms,
            "retrying node"
        );
        let mut start = NodeStart::new(ended.ambiance.clone_for_finish(), &ended.plan_node_id)
            .with_parent(ended.parent_id.clone())
            .with_previous(&ended.uuid);
        start.retry_ids = retry_ids;
        start.retry_index = attempt;
        start.delay_ms = wait_ms;
        self.start_node(start)?;
        Ok(())
    }

    fn park_for_intervention(
        &self,
        node: &NodeExecution,
        status: Status,
        failure_info: Option<FailureInfo>,
        timeout_ms: Option<u64>,
        timeout_action: RepairAction,
    ) -> Result<(), EngineError> {
        let parked = self.update_node(&node.uuid, |node| {
            if !node.status.can_transition_to(Status::InterventionWaiting) {
                return None;
            }
            node.status = Status::InterventionWaiting;
            node.pending_status = Some(status);
            node.failure_info = failure_info.clone();
            Some(node.waiting.take())
        })?;
        let Some((parked, waiting)) = parked else {
            return Ok(());
        };
        if let Some(waiting) = waiting {
            self.release_tasks(&parked.uuid, &waiting.task_ids, status);
        }
        if let Some(timeout_ms) = timeout_ms {
            self.timeouts.register(
                &parked.plan_execution_id,
                ABSOLUTE_TIMEOUT,
                timeout_ms,
                TimeoutCallback::InterventionExpired {
                    node_execution_id: parked.uuid.clone(),
                    action: timeout_action,
                },
                self.now(),
            )?;
        }
        info!(
            node_execution_id = %parked.uuid,
            identifier = %parked.identifier,
            pending_status = %status,
            "node waits for intervention"
        );
        self.refresh_plan_status(&parked.plan_execution_id)
    }

    /// Applies the repair action of an intervention wait that timed out.
    pub(super) fn intervention_expired(
        &self,
        node_execution_id: &str,
        action: RepairAction,
    ) -> Result<(), EngineError> {
        let node = self.load_node(node_execution_id)?;
        if node.status != Status::InterventionWaiting {
            return Ok(());
        }
        let action = match action {
            RepairAction::ManualIntervention => RepairAction::MarkAsFailure,
            other => other,
        };
        let status = node.pending_status.unwrap_or(Status::Failed);
        let response = repair_response(action, None);
        if !self.record_advice(&node, "INTERVENTION_TIMEOUT", status, &response)? {
            return Ok(());
        }
        warn!(node_execution_id, action = ?action, "intervention wait expired");
        self.apply_adviser_response(&node, status, node.failure_info.clone(), response)
    }

    /// Commits a final status. Returns the ended node, or `None` when the status machine
    /// refused the move (the node already ended).
    pub(super) fn finish_node(
        &self,
        node_execution_id: &str,
        status: Status,
        failure_info: Option<FailureInfo>,
        old_retry: bool,
    ) -> Result<Option<NodeExecution>, EngineError> {
        let now = self.now();
        let ended = self.update_node(node_execution_id, |node| {
            if !node.status.can_transition_to(status) {
                return None;
            }
            node.status = status;
            node.end_ts = Some(now);
            node.failure_info = failure_info.clone();
            node.old_retry = old_retry;
            node.paused_from = None;
            node.pending_status = None;
            node.pending_response = None;
            Some(node.waiting.take())
        })?;
        let Some((ended, waiting)) = ended else {
            return Ok(None);
        };
        self.timeouts.delete_for_node(&ended.uuid)?;
        if let Some(waiting) = waiting {
            self.release_tasks(&ended.uuid, &waiting.task_ids, status);
        }
        if status == Status::Aborted {
            self.abort_step(&ended);
        }
        info!(
            plan_execution_id = %ended.plan_execution_id,
            node_execution_id = %ended.uuid,
            identifier = %ended.identifier,
            status = %status,
            "node ended"
        );
        self.publish(
            &ended.plan_execution_id,
            OrchestrationEvent::new(OrchestrationEventType::NodeExecutionEnd)
                .for_node(&ended.uuid)
                .with("identifier", &ended.identifier)
                .with("status", status)
                .with("failure_info", &ended.failure_info)
                .with("old_retry", old_retry),
        );
        Ok(Some(ended))
    }

    /// Tells the task executor to stop what a node still has in flight. EXPIRED nodes
    /// expire their tasks, every other status aborts them.
    pub(super) fn release_tasks(&self, node_execution_id: &str, task_ids: &[String], status: Status) {
        for task_id in task_ids {
            let released = if status == Status::Expired {
                self.task_executor.expire_task(task_id)
            } else {
                self.task_executor.abort_task(task_id)
            };
            if let Err(error) = released {
                warn!(node_execution_id, task_id = %task_id, error = %error, "task release failed");
            }
        }
    }

    fn abort_step(&self, node: &NodeExecution) {
        let Ok(plan) = self.load_plan(&node.ambiance.plan_id) else {
            return;
        };
        if let (Some(plan_node), Some(step)) = (
            plan.node(&node.plan_node_id),
            self.registries.steps.get(&node.step_type.type_name),
        ) {
            step.handle_abort(&node.ambiance, plan_node);
        }
    }

    pub(super) fn end_node(
        &self,
        node_execution_id: &str,
        status: Status,
        failure_info: Option<FailureInfo>,
        continuation: Continuation,
    ) -> Result<(), EngineError> {
        let Some(ended) = self.finish_node(node_execution_id, status, failure_info, false)? else {
            return Ok(());
        };
        match continuation {
            Continuation::Next(next_node_id) => {
                self.queue.push(EngineSignal::StartNode(
                    NodeStart::new(ended.ambiance.clone_for_finish(), next_node_id)
                        .with_parent(ended.parent_id.clone())
                        .with_previous(&ended.uuid),
                ));
                Ok(())
            }
            Continuation::ChainEnd => self.chain_ended(&ended),
            Continuation::Silent => Ok(()),
        }
    }

    pub(super) fn chain_ended(&self, node: &NodeExecution) -> Result<(), EngineError> {
        match &node.parent_id {
            Some(parent_id) => self.notify_parent(parent_id),
            None => self.conclude_plan(&node.plan_execution_id),
        }
    }

    /// Counts one child chain as done, starts the next queued one and finishes the parent
    /// once nothing is pending.
    fn notify_parent(&self, parent_id: &str) -> Result<(), EngineError> {
        let updated = self.update_node(parent_id, |parent| {
            if parent.status.is_terminal() {
                return None;
            }
            let children = parent.children.as_mut()?;
            if children.pending == 0 {
                return None;
            }
            children.pending -= 1;
            let next = (!children.queued.is_empty()).then(|| children.queued.remove(0));
            Some((children.pending, next))
        })?;
        let Some((parent, (pending, next))) = updated else {
            return Ok(());
        };
        if let Some(child_id) = next {
            self.queue.push(EngineSignal::StartNode(
                NodeStart::new(parent.ambiance.clone(), child_id).with_parent(Some(parent.uuid.clone())),
            ));
        }
        if pending == 0 && parent.status == Status::Running {
            self.finish_children(&parent.uuid)?;
        }
        Ok(())
    }

    pub(super) fn finish_children(&self, parent_id: &str) -> Result<(), EngineError> {
        let taken = self.update_node(parent_id, |parent| {
            if parent.status != Status::Running {
                return None;
            }
            if parent.children.as_ref()?.pending != 0 {
                return None;
            }
            parent.children = None;
            Some(())
        })?;
        let Some((parent, ())) = taken else {
            return Ok(());
        };
        let outcomes = self
            .repositories
            .node_executions
            .find_all(&NodeExecutionCriteria::for_plan_execution(&parent.plan_execution_id).children_of(&parent.uuid))?
            .into_iter()
            .map(|child| ChildOutcome {
                node_execution_id: child.uuid,
                plan_node_id: child.plan_node_id,
                identifier: child.identifier,
                status: child.status,
                failure_info: child.failure_info,
            })
            .collect::<Vec<_>>();
        let response = self
            .call_step(&parent, |step, ctx| {
                step.handle_children_response(ctx, &outcomes)
                    .unwrap_or_else(StepError::into_response)
            })?
            .unwrap_or_else(StepResponse::failed);
        self.process_step_response(&parent.uuid, response)
    }

    /// Rolls the top-level nodes up into the execution status once every chain ended.
    pub(super) fn conclude_plan(&self, plan_execution_id: &str) -> Result<(), EngineError> {
        let top_level = self
            .repositories
            .node_executions
            .find_all(&NodeExecutionCriteria::for_plan_execution(plan_execution_id).top_level())?;
        let status = calculate_status(top_level.iter().map(|node| node.status));
        if !status.is_terminal() {
            return self.refresh_plan_status(plan_execution_id);
        }
        let failure_info = top_level
            .iter()
            .filter(|node| node.status == status)
            .find_map(|node| node.failure_info.clone());
        self.finish_plan(plan_execution_id, status, failure_info)
    }

    pub(super) fn finish_plan(
        &self,
        plan_execution_id: &str,
        status: Status,
        failure_info: Option<FailureInfo>,
    ) -> Result<(), EngineError> {
        let now = self.now();
        let finished = self.update_plan(plan_execution_id, |execution| {
            if execution.status.is_terminal() {
                return None;
            }
            execution.status = status;
            execution.end_ts = Some(now);
            execution.failure_info = failure_info.clone();
            execution.deferred_signals.clear();
            Some(())
        })?;
        let Some((execution, ())) = finished else {
            return Ok(());
        };
        self.timeouts.delete_for_plan_execution(plan_execution_id)?;
        info!(
            plan_execution_id,
            status = %status,
            duration_ms = now - execution.start_ts,
            "plan execution ended"
        );
        self.publish(
            plan_execution_id,
            OrchestrationEvent::new(OrchestrationEventType::OrchestrationEnd)
                .with("status", status)
                .with("failure_info", &execution.failure_info),
        );
        Ok(())
    }

    /// Re-derives the status of a running execution from its active nodes. Only a
    /// plan-level pause makes the execution PAUSED.
    pub(super) fn refresh_plan_status(&self, plan_execution_id: &str) -> Result<(), EngineError> {
        let active = active_node_executions(
            self.repositories.node_executions.as_ref(),
            plan_execution_id,
        )?;
        if active.is_empty() {
            return Ok(());
        }
        let status = match calculate_status(active.iter().map(|node| node.status)) {
            Status::Paused => Status::Running,
            other => other,
        };
        self.update_plan(plan_execution_id, |execution| {
            if execution.status.is_terminal()
                || execution.status == Status::Paused
                || execution.status == status
            {
                return None;
            }
            execution.status = status;
            Some(())
        })?;
        Ok(())
    }

    /// Ends every other active node silently, then the execution itself.
    fn end_plan(
        &self,
        plan_execution_id: &str,
        status: Status,
        failure_info: Option<FailureInfo>,
    ) -> Result<(), EngineError> {
        let mut active = active_node_executions(
            self.repositories.node_executions.as_ref(),
            plan_execution_id,
        )?;
        active.sort_by_key(|node| Reverse(node.ambiance.depth()));
        for node in active {
            self.finish_node(&node.uuid, Status::Aborted, None, false)?;
        }
        self.finish_plan(plan_execution_id, status, failure_info)
    }

    /// Ends an execution that cannot proceed because of how it is configured.
    pub(super) fn fail_execution(&self, plan_execution_id: &str, reason: &str) -> Result<(), EngineError> {
        let failure_info = FailureInfo::new(reason, FailureType::Configuration);
        let errored = error_out_active_nodes(
            self.repositories.node_executions.as_ref(),
            plan_execution_id,
            self.config.cas_retry_limit,
            &failure_info,
            self.now(),
        )?;
        for (node, task_ids) in &errored {
            self.timeouts.delete_for_node(&node.uuid)?;
            self.release_tasks(&node.uuid, task_ids, Status::Errored);
            self.publish(
                plan_execution_id,
                OrchestrationEvent::new(OrchestrationEventType::NodeExecutionEnd)
                    .for_node(&node.uuid)
                    .with("identifier", &node.identifier)
                    .with("status", node.status)
                    .with("failure_info", &node.failure_info),
            );
        }
        self.finish_plan(plan_execution_id, Status::Failed, Some(failure_info))
    }
}

fn task_response(waiting: &WaitState) -> ResponseData {
    waiting
        .correlation_ids
        .first()
        .and_then(|correlation_id| waiting.responses.get(correlation_id))
        .cloned()
        .unwrap_or_else(|| ResponseData::error("task finished without a response"))
}

#[cfg(test)]
#[path = "responses_test.rs"]
mod tests;
