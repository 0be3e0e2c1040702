use super::error::EngineError;
use super::orchestration::OrchestrationEngine;
use super::signal::{EngineSignal, NodeStart};
use super::config::MatchPolicy;
use crate::events::{OrchestrationEvent, OrchestrationEventType};
use crate::execution::{ChildrenState, NodeExecution, PlanExecution, WaitKind, WaitState};
use crate::facilitator::{ExecutionMode, FacilitatorResponse};
use crate::resolver::{ExecutionLookup, ResolverError};
use crate::step::{Step, StepContext, StepError, StepResponse, TaskChainLink};
use crate::task::{ResponseData, TaskRequest};
use crate::timeout::{TimeoutCallback, ACTIVE_TIMEOUT};
use pms_core::{
    evaluate_condition, materialize_value, FailureInfo, FailureType, Level, PlanNode, RefType, Status,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// What `run_node` does once the step has been asked how to run.
enum Dispatch {
    Respond(StepResponse),
    Async(Vec<String>),
    Task(WaitKind, TaskChainLink),
    Children(Vec<String>, Option<usize>),
    Wait(u64),
}

impl OrchestrationEngine {
    pub(super) fn start_node(&self, start: NodeStart) -> Result<Option<NodeExecution>, EngineError> {
        let plan_execution_id = start.ambiance.plan_execution_id.clone();
        let execution = self.plan_execution(&plan_execution_id)?;
        if execution.status.is_terminal() {
            debug!(plan_execution_id = %plan_execution_id, node_id = %start.node_id, "execution finished, start dropped");
            return Ok(None);
        }
        if self.should_defer(&execution, start.parent_id.as_deref())? {
            self.defer_signal(&plan_execution_id, EngineSignal::StartNode(start))?;
            return Ok(None);
        }

        let plan = self.load_plan(&execution.plan_id)?;
        let plan_node = plan.node(&start.node_id).ok_or_else(|| {
            EngineError::configuration(
                &plan_execution_id,
                format!("node `{}` is not part of plan `{}`", start.node_id, plan.uuid),
            )
        })?;
        let now = self.now();
        let uuid = uuid::Uuid::new_v4().to_string();
        let mut level = Level::new(
            &uuid,
            &plan_node.uuid,
            &plan_node.identifier,
            plan_node.step_type.clone(),
        )
        .with_start_ts(now)
        .with_retry_index(start.retry_index)
        .with_skip_expression_chain(plan_node.skip_expression_chain);
        let group = plan_node
            .group
            .clone()
            .or_else(|| self.registries.group_for_category(plan_node.step_type.category));
        if let Some(group) = group {
            level = level.with_group(group);
        }

        let node = self.repositories.node_executions.save(NodeExecution {
            uuid,
            plan_execution_id: plan_execution_id.clone(),
            plan_node_id: plan_node.uuid.clone(),
            identifier: plan_node.identifier.clone(),
            ambiance: start.ambiance.clone_for_child(level),
            status: Status::Queued,
            mode: None,
            step_type: plan_node.step_type.clone(),
            parent_id: start.parent_id.clone(),
            previous_id: start.previous_id.clone(),
            next_id: None,
            start_ts: now,
            end_ts: None,
            adviser_response: None,
            failure_info: None,
            timeout_instance_ids: Vec::new(),
            retry_ids: start.retry_ids.clone(),
            old_retry: false,
            interrupt_history: Vec::new(),
            waiting: None,
            children: None,
            paused_from: None,
            pending_status: None,
            pending_response: None,
            version: 0,
        })?;
        if let Some(previous_id) = &start.previous_id {
            self.update_node(previous_id, |previous| {
                previous.next_id = Some(node.uuid.clone());
                Some(())
            })?;
        }

        debug!(
            plan_execution_id = %plan_execution_id,
            node_execution_id = %node.uuid,
            identifier = %node.identifier,
            retry_index = start.retry_index,
            "node queued"
        );
        self.publish(
            &plan_execution_id,
            OrchestrationEvent::new(OrchestrationEventType::NodeExecutionStart)
                .for_node(&node.uuid)
                .with("identifier", &node.identifier)
                .with("plan_node_id", &node.plan_node_id)
                .with("parent_id", &node.parent_id)
                .with("retry_index", start.retry_index),
        );

        if start.delay_ms > 0 {
            self.timeouts.register(
                &plan_execution_id,
                ACTIVE_TIMEOUT,
                start.delay_ms,
                TimeoutCallback::BeginNode {
                    node_execution_id: node.uuid.clone(),
                },
                now,
            )?;
        } else {
            self.queue.push(EngineSignal::BeginNode {
                node_execution_id: node.uuid.clone(),
            });
        }
        Ok(Some(node))
    }

    /// Evaluates the skip condition, arms the node's timeouts and picks its execution mode.
    pub(super) fn begin_node(&self, node_execution_id: &str) -> Result<(), EngineError> {
        let node = self.load_node(node_execution_id)?;
        if node.status != Status::Queued || node.mode.is_some() {
            return Ok(());
        }
        let execution = self.plan_execution(&node.plan_execution_id)?;
        if execution.status.is_terminal() {
            return Ok(());
        }
        if self.should_defer(&execution, node.parent_id.as_deref())? {
            return self.defer_signal(
                &execution.uuid,
                EngineSignal::BeginNode {
                    node_execution_id: node.uuid.clone(),
                },
            );
        }
        let plan = self.load_plan(&execution.plan_id)?;
        let plan_node = self.plan_node(&plan, &node)?;

        if let Some(condition) = &plan_node.skip_condition {
            let sweeping = self.registries.resolver(RefType::SweepingOutput)?;
            let outcomes = self.registries.resolver(RefType::Outcome)?;
            let lookup = ExecutionLookup::new(
                &node.ambiance,
                &execution.inputs,
                sweeping.as_ref(),
                outcomes.as_ref(),
            );
            match evaluate_condition(condition, &lookup) {
                Ok(true) => {
                    info!(node_execution_id = %node.uuid, identifier = %node.identifier, "node skipped");
                    return self.process_step_response(&node.uuid, StepResponse::with_status(Status::Skipped));
                }
                Ok(false) => {}
                Err(error) => {
                    return self.process_step_response(
                        &node.uuid,
                        StepResponse::failed(FailureInfo::new(
                            format!("skip condition of `{}`: {error}", node.identifier),
                            FailureType::Expression,
                        )),
                    );
                }
            }
        }

        let facilitated = self.facilitate(&node, plan_node)?;
        let mode = facilitated.execution_mode;
        let initial_wait_ms = facilitated.initial_wait_ms;
        let claimed = self.update_node(&node.uuid, |node| {
            if node.status != Status::Queued || node.mode.is_some() {
                return None;
            }
            node.mode = Some(mode);
            if initial_wait_ms > 0 {
                node.status = Status::TimedWaiting;
            }
            Some(())
        })?;
        if claimed.is_none() {
            return Ok(());
        }
        self.publish(
            &node.plan_execution_id,
            OrchestrationEvent::new(OrchestrationEventType::FacilitatorResponse)
                .for_node(&node.uuid)
                .with("execution_mode", mode)
                .with("initial_wait_ms", initial_wait_ms),
        );

        let now = self.now();
        let mut timeout_ids = Vec::with_capacity(plan_node.timeout_obtainments.len());
        for obtainment in &plan_node.timeout_obtainments {
            let instance = self.timeouts.register(
                &node.plan_execution_id,
                &obtainment.dimension,
                obtainment.timeout_ms,
                TimeoutCallback::ExpireNode {
                    node_execution_id: node.uuid.clone(),
                },
                now,
            )?;
            timeout_ids.push(instance.uuid);
        }
        if !timeout_ids.is_empty() {
            self.update_node(&node.uuid, |node| {
                node.timeout_instance_ids.extend(timeout_ids.iter().cloned());
                Some(())
            })?;
        }

        if initial_wait_ms > 0 {
            self.timeouts.register(
                &node.plan_execution_id,
                ACTIVE_TIMEOUT,
                initial_wait_ms,
                TimeoutCallback::RunNode {
                    node_execution_id: node.uuid.clone(),
                },
                now,
            )?;
            return Ok(());
        }
        self.run_node(&node.uuid)
    }

    pub(super) fn run_node(&self, node_execution_id: &str) -> Result<(), EngineError> {
        let node = self.load_node(node_execution_id)?;
        let Some(mode) = node.mode else {
            return Ok(());
        };
        if !matches!(node.status, Status::Queued | Status::TimedWaiting) || node.waiting.is_some() {
            return Ok(());
        }
        let execution = self.plan_execution(&node.plan_execution_id)?;
        if execution.status.is_terminal() {
            return Ok(());
        }
        if self.should_defer(&execution, node.parent_id.as_deref())? {
            return self.defer_signal(
                &execution.uuid,
                EngineSignal::RunNode {
                    node_execution_id: node.uuid.clone(),
                },
            );
        }
        let started = self.update_node(node_execution_id, |node| {
            let ready = matches!(node.status, Status::Queued | Status::TimedWaiting) && node.waiting.is_none();
            ready.then(|| node.status = Status::Running)
        })?;
        let Some((node, ())) = started else {
            return Ok(());
        };

        let dispatch = self.call_step(&node, |step, ctx| {
            let dispatched = match mode {
                ExecutionMode::Sync => step.execute_sync(ctx).map(Dispatch::Respond),
                ExecutionMode::Async => step
                    .execute_async(ctx)
                    .map(|response| Dispatch::Async(response.callback_ids)),
                ExecutionMode::Task => step.obtain_task(ctx).map(|task_request| {
                    Dispatch::Task(
                        WaitKind::Task,
                        TaskChainLink {
                            task_request,
                            chain_end: true,
                            pass_through: Value::Null,
                        },
                    )
                }),
                ExecutionMode::TaskChain => step
                    .start_chain(ctx)
                    .map(|link| Dispatch::Task(WaitKind::TaskChain, link)),
                ExecutionMode::Child => step
                    .obtain_child(ctx)
                    .map(|child| Dispatch::Children(vec![child.child_node_id], None)),
                ExecutionMode::Children => step
                    .obtain_children(ctx)
                    .map(|children| Dispatch::Children(children.children, children.max_concurrency)),
                ExecutionMode::Wait => step.obtain_wait(ctx).map(|wait| Dispatch::Wait(wait.duration_ms)),
            };
            dispatched.unwrap_or_else(|error| Dispatch::Respond(error.into_response()))
        })?;
        let dispatch = dispatch.unwrap_or_else(|failure| Dispatch::Respond(StepResponse::failed(failure)));

        match dispatch {
            Dispatch::Respond(response) => self.process_step_response(&node.uuid, response),
            Dispatch::Async(callback_ids) => self.park_async(&node, callback_ids),
            Dispatch::Task(kind, link) => self.dispatch_task(&node, kind, link),
            Dispatch::Children(children, max_concurrency) => {
                self.start_children(&node, children, max_concurrency)
            }
            Dispatch::Wait(duration_ms) => self.park_timed(&node, duration_ms),
        }
    }

    /// Resumes a node whose step-requested wait elapsed.
    pub(super) fn complete_wait(&self, node_execution_id: &str) -> Result<(), EngineError> {
        let resumed = self.update_node(node_execution_id, |node| {
            let timed = node.status == Status::TimedWaiting
                && node
                    .waiting
                    .as_ref()
                    .is_some_and(|waiting| waiting.kind == WaitKind::Timed);
            timed.then(|| {
                node.status = Status::Running;
                node.waiting = None;
            })
        })?;
        let Some((node, ())) = resumed else {
            return Ok(());
        };
        let response = self
            .call_step(&node, |step, ctx| {
                step.finish_wait(ctx).unwrap_or_else(StepError::into_response)
            })?
            .unwrap_or_else(StepResponse::failed);
        self.process_step_response(&node.uuid, response)
    }

    /// Queues one task for a TASK or TASK_CHAIN node and parks it in TASK_WAITING.
    pub(super) fn dispatch_task(
        &self,
        node: &NodeExecution,
        kind: WaitKind,
        link: TaskChainLink,
    ) -> Result<(), EngineError> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let request = TaskRequest {
            correlation_id: correlation_id.clone(),
            ..link.task_request
        };
        let mut waiting = WaitState::new(kind, vec![correlation_id.clone()]);
        waiting.chain_end = link.chain_end;
        waiting.pass_through = link.pass_through;
        if self.park(&node.uuid, Status::TaskWaiting, waiting)?.is_none() {
            return Ok(());
        }

        match self
            .task_executor
            .queue_task(&node.ambiance.setup_abstractions, &request, 0)
        {
            Ok(task_id) => {
                debug!(
                    node_execution_id = %node.uuid,
                    task_id = %task_id,
                    task_type = %request.task_type,
                    correlation_id = %correlation_id,
                    "task queued"
                );
                self.update_node(&node.uuid, |node| {
                    let waiting = node.waiting.as_mut()?;
                    if !waiting.correlation_ids.contains(&correlation_id) {
                        return None;
                    }
                    waiting.task_ids.push(task_id.clone());
                    Some(())
                })?;
                Ok(())
            }
            Err(error) => {
                warn!(node_execution_id = %node.uuid, error = %error, "task dispatch failed");
                self.handle_step_response(
                    &correlation_id,
                    ResponseData::Error {
                        message: error.to_string(),
                        failure_types: BTreeSet::from([FailureType::Connectivity]),
                    },
                )
                .map(|_| ())
            }
        }
    }

    fn park_async(&self, node: &NodeExecution, callback_ids: Vec<String>) -> Result<(), EngineError> {
        let waiting = WaitState::new(WaitKind::Async, callback_ids);
        let parked = self.park(&node.uuid, Status::AsyncWaiting, waiting)?;
        let complete = parked.is_some_and(|node| {
            node.status == Status::AsyncWaiting
                && node.waiting.as_ref().is_some_and(WaitState::is_complete)
        });
        if complete {
            self.continue_waiting(&node.uuid)?;
        }
        Ok(())
    }

    fn park_timed(&self, node: &NodeExecution, duration_ms: u64) -> Result<(), EngineError> {
        let waiting = WaitState::new(WaitKind::Timed, Vec::new());
        if self.park(&node.uuid, Status::TimedWaiting, waiting)?.is_none() {
            return Ok(());
        }
        let signal_now = duration_ms == 0;
        if signal_now {
            self.queue.push(EngineSignal::CompleteWait {
                node_execution_id: node.uuid.clone(),
            });
            return Ok(());
        }
        self.timeouts.register(
            &node.plan_execution_id,
            ACTIVE_TIMEOUT,
            duration_ms,
            TimeoutCallback::CompleteWait {
                node_execution_id: node.uuid.clone(),
            },
            self.now(),
        )?;
        Ok(())
    }

    /// Moves a RUNNING node into a wait. A node paused while its step ran keeps PAUSED and
    /// resumes into the wait instead.
    fn park(&self, node_execution_id: &str, to: Status, waiting: WaitState) -> Result<Option<NodeExecution>, EngineError> {
        Ok(self
            .update_node(node_execution_id, |node| {
                match node.status {
                    Status::Running => node.status = to,
                    Status::Paused if node.paused_from == Some(Status::Running) => {
                        node.paused_from = Some(to)
                    }
                    _ => return None,
                }
                node.waiting = Some(waiting.clone());
                Some(())
            })?
            .map(|(node, ())| node))
    }

    fn start_children(
        &self,
        node: &NodeExecution,
        children: Vec<String>,
        max_concurrency: Option<usize>,
    ) -> Result<(), EngineError> {
        let limit = max_concurrency
            .or(self.config.default_children_concurrency)
            .unwrap_or(children.len())
            .max(1);
        let split = limit.min(children.len());
        let state = ChildrenState {
            pending: children.len(),
            queued: children[split..].to_vec(),
        };
        let claimed = self.update_node(&node.uuid, |node| {
            let running = node.status == Status::Running
                || (node.status == Status::Paused && node.paused_from == Some(Status::Running));
            if !running || node.children.is_some() {
                return None;
            }
            node.children = Some(state.clone());
            Some(())
        })?;
        let Some((node, ())) = claimed else {
            return Ok(());
        };
        debug!(
            node_execution_id = %node.uuid,
            children = children.len(),
            limit,
            "starting child chains"
        );
        if children.is_empty() {
            return self.finish_children(&node.uuid);
        }
        for child_id in &children[..split] {
            self.queue.push(EngineSignal::StartNode(
                NodeStart::new(node.ambiance.clone(), child_id).with_parent(Some(node.uuid.clone())),
            ));
        }
        Ok(())
    }

    /// Picks the execution mode through the node's facilitator obtainments.
    fn facilitate(&self, node: &NodeExecution, plan_node: &PlanNode) -> Result<FacilitatorResponse, EngineError> {
        let mut matched: Vec<(&str, FacilitatorResponse)> = Vec::new();
        for obtainment in &plan_node.facilitator_obtainments {
            let facilitator = self.registries.facilitators.obtain(&obtainment.facilitator_type)?;
            let Some(response) = facilitator.facilitate(
                &node.ambiance,
                &plan_node.step_parameters,
                &obtainment.parameters,
            ) else {
                continue;
            };
            matched.push((obtainment.facilitator_type.as_str(), response));
            if self.config.match_policy == MatchPolicy::FirstMatch {
                break;
            }
        }
        match matched.as_slice() {
            [] => Err(EngineError::configuration(
                &node.plan_execution_id,
                format!("no facilitator resolved an execution mode for node `{}`", node.identifier),
            )),
            [(_, response)] => Ok(*response),
            [..] => Err(EngineError::configuration(
                &node.plan_execution_id,
                format!(
                    "facilitators {} all matched node `{}`",
                    matched.iter().map(|(key, _)| *key).collect::<Vec<_>>().join(", "),
                    node.identifier
                ),
            )),
        }
    }

    /// Runs `call` against the node's step with its parameters materialized and inputs
    /// bound. Preparation failures come back as the node's failure.
    pub(super) fn call_step<T>(
        &self,
        node: &NodeExecution,
        call: impl FnOnce(&dyn Step, &StepContext<'_>) -> T,
    ) -> Result<Result<T, FailureInfo>, EngineError> {
        let execution = self.plan_execution(&node.plan_execution_id)?;
        let plan = self.load_plan(&execution.plan_id)?;
        let plan_node = self.plan_node(&plan, node)?;
        let step = self.registries.steps.obtain(&plan_node.step_type.type_name)?;
        Ok(self
            .step_context(node, plan_node, &execution)?
            .map(|ctx| call(step.as_ref(), &ctx)))
    }

    fn step_context<'a>(
        &self,
        node: &'a NodeExecution,
        plan_node: &'a PlanNode,
        execution: &PlanExecution,
    ) -> Result<Result<StepContext<'a>, FailureInfo>, EngineError> {
        let sweeping = self.registries.resolver(RefType::SweepingOutput)?;
        let outcomes = self.registries.resolver(RefType::Outcome)?;
        let lookup = ExecutionLookup::new(
            &node.ambiance,
            &execution.inputs,
            sweeping.as_ref(),
            outcomes.as_ref(),
        );
        let parameters = match materialize_value(&plan_node.step_parameters, &lookup) {
            Ok(parameters) => parameters,
            Err(error) => {
                return Ok(Err(FailureInfo::new(
                    format!("parameters of `{}`: {error}", plan_node.identifier),
                    FailureType::Expression,
                )))
            }
        };
        let mut inputs = BTreeMap::new();
        for ref_object in &plan_node.ref_objects {
            let resolver = self.registries.resolver(ref_object.ref_type)?;
            match resolver.resolve(&node.ambiance, ref_object) {
                Ok(value) => {
                    inputs.insert(ref_object.name.clone(), value);
                }
                Err(ResolverError::NotFound { name }) => {
                    return Ok(Err(FailureInfo::new(
                        format!(
                            "input `{}` of `{}` refers to missing {} `{name}`",
                            ref_object.name,
                            plan_node.identifier,
                            ref_object.ref_type.registry_key()
                        ),
                        FailureType::Expression,
                    )))
                }
                Err(error) => return Err(error.into()),
            }
        }
        Ok(Ok(StepContext {
            ambiance: &node.ambiance,
            plan_node,
            parameters,
            inputs,
        }))
    }

    /// Work for a paused execution, or below a paused parent, waits until resume.
    pub(super) fn should_defer(&self, execution: &PlanExecution, parent_id: Option<&str>) -> Result<bool, EngineError> {
        if execution.status == Status::Paused {
            return Ok(true);
        }
        match parent_id {
            Some(parent_id) => Ok(self.load_node(parent_id)?.status == Status::Paused),
            None => Ok(false),
        }
    }

    pub(super) fn defer_signal(&self, plan_execution_id: &str, signal: EngineSignal) -> Result<(), EngineError> {
        debug!(plan_execution_id, signal = signal.kind(), "signal deferred until resume");
        self.update_plan(plan_execution_id, |execution| {
            if execution.status.is_terminal() {
                return None;
            }
            execution.deferred_signals.push(signal.clone());
            Some(())
        })?;
        Ok(())
    }
}
