use super::config::EngineConfig;
use super::error::EngineError;
use super::signal::{EngineSignal, LocalSignalQueue, NodeStart, SignalQueue};
use crate::events::{EventBus, OrchestrationEvent, OrchestrationEventType, RedactOptions};
use crate::execution::{NodeExecution, PlanExecution};
use crate::registry::EngineRegistries;
use crate::repository::{
    require_node_execution, require_plan_execution, update_node_execution, update_plan_execution,
    NodeExecutionCriteria, Repositories,
};
use crate::step::{Step, StepResponse};
use crate::task::{RejectingTaskExecutor, ResponseData, TaskExecutor};
use crate::timeout::{Clock, SystemClock, TimeoutCallback, TimeoutEngine};
use pms_core::{plan_hash, Ambiance, FailureInfo, FailureType, Plan, PlanNode, Status};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The plan interpreter. All execution state lives in the repositories; the engine
/// itself only holds shared handles, so one instance can serve many executions
/// from many threads.
pub struct OrchestrationEngine {
    pub(super) config: EngineConfig,
    pub(super) registries: Arc<EngineRegistries>,
    pub(super) repositories: Repositories,
    pub(super) task_executor: Arc<dyn TaskExecutor>,
    pub(super) timeouts: TimeoutEngine,
    pub(super) events: Arc<EventBus>,
    pub(super) queue: Arc<dyn SignalQueue>,
    pub(super) clock: Arc<dyn Clock>,
}

#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    repositories: Option<Repositories>,
    registries: Option<Arc<EngineRegistries>>,
    steps: Vec<(String, Arc<dyn Step>)>,
    task_executor: Option<Arc<dyn TaskExecutor>>,
    queue: Option<Arc<dyn SignalQueue>>,
    clock: Option<Arc<dyn Clock>>,
    redact: RedactOptions,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn repositories(mut self, repositories: Repositories) -> Self {
        self.repositories = Some(repositories);
        self
    }

    /// Replaces the default registries. Resolvers in them must share the output
    /// repository handed to `repositories`.
    pub fn registries(mut self, registries: Arc<EngineRegistries>) -> Self {
        self.registries = Some(registries);
        self
    }

    pub fn step(mut self, step_type: impl Into<String>, step: Arc<dyn Step>) -> Self {
        self.steps.push((step_type.into(), step));
        self
    }

    pub fn task_executor(mut self, task_executor: Arc<dyn TaskExecutor>) -> Self {
        self.task_executor = Some(task_executor);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn SignalQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn redact(mut self, redact: RedactOptions) -> Self {
        self.redact = redact;
        self
    }

    pub fn build(self) -> Result<OrchestrationEngine, EngineError> {
        let repositories = self.repositories.unwrap_or_else(Repositories::in_memory);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let registries = match self.registries {
            Some(registries) => registries,
            None => Arc::new(EngineRegistries::with_defaults(
                repositories.outputs.clone(),
                clock.clone(),
            )?),
        };
        for (step_type, step) in self.steps {
            registries.steps.register(step_type, step)?;
        }
        let timeouts = TimeoutEngine::new(
            registries.timeout_trackers.clone(),
            repositories.timeouts.clone(),
            self.config.cas_retry_limit,
        );
        Ok(OrchestrationEngine {
            config: self.config,
            registries,
            task_executor: self
                .task_executor
                .unwrap_or_else(|| Arc::new(RejectingTaskExecutor)),
            timeouts,
            events: Arc::new(EventBus::new(clock.clone()).with_redaction(self.redact)),
            queue: self
                .queue
                .unwrap_or_else(|| Arc::new(LocalSignalQueue::default())),
            repositories,
            clock,
        })
    }
}

impl OrchestrationEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registries(&self) -> &Arc<EngineRegistries> {
        &self.registries
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn queue(&self) -> &Arc<dyn SignalQueue> {
        &self.queue
    }

    /// Creates the plan execution and queues its starting node.
    pub fn start_execution(&self, plan: Plan, inputs: Value) -> Result<PlanExecution, EngineError> {
        let hash = plan_hash(&plan)?;
        let plan = self.repositories.plans.save_plan(plan)?;
        let now = self.now();
        let execution = self.repositories.plan_executions.save(PlanExecution {
            uuid: uuid::Uuid::new_v4().to_string(),
            plan_id: plan.uuid.clone(),
            plan_hash: hash,
            status: Status::Running,
            start_ts: now,
            end_ts: None,
            inputs,
            metadata: Default::default(),
            setup_abstractions: plan.setup_abstractions.clone(),
            failure_info: None,
            deferred_signals: Vec::new(),
            version: 0,
        })?;
        info!(
            plan_execution_id = %execution.uuid,
            plan_id = %plan.uuid,
            starting_node_id = %plan.starting_node_id,
            "plan execution started"
        );
        self.publish(
            &execution.uuid,
            OrchestrationEvent::new(OrchestrationEventType::OrchestrationStart)
                .with("plan_id", &plan.uuid)
                .with("plan_hash", &execution.plan_hash),
        );
        let ambiance = Ambiance::new(&execution.uuid, &plan.uuid)
            .with_setup_abstractions(execution.setup_abstractions.clone());
        self.queue.push(EngineSignal::StartNode(NodeStart::new(
            ambiance,
            plan.starting_node_id.clone(),
        )));
        Ok(execution)
    }

    /// Creates a node execution for `node_id` below `ambiance` and queues its start.
    /// The current level of `ambiance`, if any, becomes the parent.
    pub fn trigger_node(&self, ambiance: &Ambiance, node_id: &str) -> Result<Option<NodeExecution>, EngineError> {
        let parent_id = ambiance.current_runtime_id().map(str::to_string);
        self.start_node(NodeStart::new(ambiance.clone(), node_id).with_parent(parent_id))
    }

    /// Applies one signal. Configuration errors end the affected execution as FAILED
    /// and are not returned.
    pub fn process(&self, signal: EngineSignal) -> Result<(), EngineError> {
        let kind = signal.kind();
        let plan_execution_id = self.signal_plan_execution_id(&signal);
        let result = match signal {
            EngineSignal::StartNode(start) => self.start_node(start).map(|_| ()),
            EngineSignal::BeginNode { node_execution_id } => self.begin_node(&node_execution_id),
            EngineSignal::RunNode { node_execution_id } => self.run_node(&node_execution_id),
            EngineSignal::CompleteWait { node_execution_id } => self.complete_wait(&node_execution_id),
            EngineSignal::StepResponse {
                correlation_id,
                response,
            } => self.handle_step_response(&correlation_id, response).map(|_| ()),
            EngineSignal::Interrupt { interrupt_id } => self.handle_interrupt(&interrupt_id),
            EngineSignal::InterventionExpired {
                node_execution_id,
                action,
            } => self.intervention_expired(&node_execution_id, action),
        };
        match result {
            Err(error) if error.is_configuration() => {
                let Some(plan_execution_id) = plan_execution_id else {
                    return Err(error);
                };
                warn!(
                    plan_execution_id = %plan_execution_id,
                    signal = kind,
                    error = %error,
                    "configuration error, failing plan execution"
                );
                self.fail_execution(&plan_execution_id, &error.to_string())
            }
            other => other,
        }
    }

    /// Drains the local queue. Returns the number of signals processed.
    pub fn run_until_idle(&self) -> Result<usize, EngineError> {
        let mut processed = 0usize;
        while let Some(signal) = self.queue.pop() {
            if processed >= self.config.max_signal_iterations {
                self.queue.push(signal);
                return Err(EngineError::SignalLimit {
                    limit: self.config.max_signal_iterations,
                });
            }
            self.process(signal)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Fires every expired timeout, turning each into a signal. Returns how many fired.
    pub fn check_timeouts(&self) -> Result<usize, EngineError> {
        let fired = self.timeouts.poll_expired(self.now())?;
        for instance in &fired {
            self.publish(
                &instance.plan_execution_id,
                OrchestrationEvent::new(OrchestrationEventType::TimeoutExpired)
                    .for_node(&instance.node_execution_id)
                    .with("dimension", &instance.dimension)
                    .with("callback", &instance.callback),
            );
            match &instance.callback {
                TimeoutCallback::ExpireNode { node_execution_id } => {
                    if let Err(error) = self.register_interrupt(
                        crate::execution::InterruptType::Expire,
                        &instance.plan_execution_id,
                        Some(node_execution_id.as_str()),
                        Value::Null,
                    ) {
                        debug!(node_execution_id = %node_execution_id, error = %error, "expiry dropped");
                    }
                }
                TimeoutCallback::BeginNode { node_execution_id } => self.queue.push(EngineSignal::BeginNode {
                    node_execution_id: node_execution_id.clone(),
                }),
                TimeoutCallback::RunNode { node_execution_id } => self.queue.push(EngineSignal::RunNode {
                    node_execution_id: node_execution_id.clone(),
                }),
                TimeoutCallback::CompleteWait { node_execution_id } => {
                    self.queue.push(EngineSignal::CompleteWait {
                        node_execution_id: node_execution_id.clone(),
                    })
                }
                TimeoutCallback::InterventionExpired {
                    node_execution_id,
                    action,
                } => self.queue.push(EngineSignal::InterventionExpired {
                    node_execution_id: node_execution_id.clone(),
                    action: *action,
                }),
            }
        }
        Ok(fired.len())
    }

    /// Records the response for a waiting node. Returns `false` when nothing waits on
    /// `correlation_id` or the response was already recorded.
    pub fn handle_step_response(&self, correlation_id: &str, response: ResponseData) -> Result<bool, EngineError> {
        let Some(node) = self
            .repositories
            .node_executions
            .find_by_correlation_id(correlation_id)?
        else {
            debug!(correlation_id, "no node waits on correlation id");
            return Ok(false);
        };
        let recorded = self.update_node(&node.uuid, |node| {
            if node.status.is_terminal() {
                return None;
            }
            let waiting = node.waiting.as_mut()?;
            if !waiting.correlation_ids.iter().any(|id| id == correlation_id)
                || waiting.responses.contains_key(correlation_id)
            {
                return None;
            }
            waiting
                .responses
                .insert(correlation_id.to_string(), response.clone());
            Some(())
        })?;
        let Some((node, ())) = recorded else {
            debug!(correlation_id, node_execution_id = %node.uuid, "duplicate response ignored");
            return Ok(false);
        };
        let complete = node.waiting.as_ref().is_some_and(|waiting| waiting.is_complete());
        if complete && matches!(node.status, Status::AsyncWaiting | Status::TaskWaiting) {
            self.continue_waiting(&node.uuid)?;
        }
        Ok(true)
    }

    /// Routes an unexpected error raised on behalf of the node at the tip of
    /// `ambiance` through the adviser pipeline as a FAILED response.
    pub fn handle_error(&self, ambiance: &Ambiance, error: &dyn std::error::Error) -> Result<(), EngineError> {
        let Some(node_execution_id) = ambiance.current_runtime_id() else {
            return self.fail_execution(&ambiance.plan_execution_id, &error.to_string());
        };
        warn!(node_execution_id, error = %error, "node error routed to advisers");
        self.process_step_response(
            node_execution_id,
            StepResponse::failed(FailureInfo::new(error.to_string(), FailureType::Unknown)),
        )
    }

    /// Runs the node's advisers for a step that ended with `status` and applies the outcome.
    pub fn handle_advise(
        &self,
        node_execution_id: &str,
        status: Status,
        failure_info: Option<FailureInfo>,
    ) -> Result<(), EngineError> {
        let node = self.load_node(node_execution_id)?;
        if node.status.is_terminal() {
            return Ok(());
        }
        self.advise(&node, status, failure_info)
    }

    pub fn plan_execution(&self, plan_execution_id: &str) -> Result<PlanExecution, EngineError> {
        Ok(require_plan_execution(
            self.repositories.plan_executions.as_ref(),
            plan_execution_id,
        )?)
    }

    /// Every node execution of an execution, old retries included, by start time.
    pub fn node_executions(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>, EngineError> {
        Ok(self
            .repositories
            .node_executions
            .find_all(&NodeExecutionCriteria::for_plan_execution(plan_execution_id).including_old_retries())?)
    }

    pub(super) fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    pub(super) fn publish(&self, plan_execution_id: &str, event: OrchestrationEvent) {
        self.events.publish(plan_execution_id, event);
    }

    pub(super) fn load_node(&self, id: &str) -> Result<NodeExecution, EngineError> {
        Ok(require_node_execution(
            self.repositories.node_executions.as_ref(),
            id,
        )?)
    }

    pub(super) fn load_plan(&self, plan_id: &str) -> Result<Arc<Plan>, EngineError> {
        self.repositories
            .plans
            .find_plan(plan_id)?
            .ok_or_else(|| EngineError::PlanNotFound {
                plan_id: plan_id.to_string(),
            })
    }

    pub(super) fn plan_node<'p>(
        &self,
        plan: &'p Plan,
        node: &NodeExecution,
    ) -> Result<&'p PlanNode, EngineError> {
        plan.node(&node.plan_node_id).ok_or_else(|| {
            EngineError::configuration(
                &node.plan_execution_id,
                format!("plan node `{}` is not part of plan `{}`", node.plan_node_id, plan.uuid),
            )
        })
    }

    /// Optimistic update of one node. A status change is fed to the node's timeout
    /// trackers and published.
    pub(super) fn update_node<T>(
        &self,
        id: &str,
        mut mutate: impl FnMut(&mut NodeExecution) -> Option<T>,
    ) -> Result<Option<(NodeExecution, T)>, EngineError> {
        let mut from = None;
        let updated = update_node_execution(
            self.repositories.node_executions.as_ref(),
            id,
            self.config.cas_retry_limit,
            |node| {
                from = Some(node.status);
                mutate(node)
            },
        )?;
        if let (Some((node, _)), Some(from)) = (&updated, from) {
            if node.status != from {
                self.on_node_status_change(node, from)?;
            }
        }
        Ok(updated)
    }

    pub(super) fn update_plan<T>(
        &self,
        id: &str,
        mutate: impl FnMut(&mut PlanExecution) -> Option<T>,
    ) -> Result<Option<(PlanExecution, T)>, EngineError> {
        Ok(update_plan_execution(
            self.repositories.plan_executions.as_ref(),
            id,
            self.config.cas_retry_limit,
            mutate,
        )?)
    }

    fn on_node_status_change(&self, node: &NodeExecution, from: Status) -> Result<(), EngineError> {
        debug!(
            node_execution_id = %node.uuid,
            identifier = %node.identifier,
            from = %from,
            to = %node.status,
            "node status changed"
        );
        self.timeouts
            .on_status_update(&node.uuid, node.status, self.now())?;
        self.publish(
            &node.plan_execution_id,
            OrchestrationEvent::new(OrchestrationEventType::NodeExecutionStatusUpdate)
                .for_node(&node.uuid)
                .with("identifier", &node.identifier)
                .with("from", from)
                .with("to", node.status),
        );
        Ok(())
    }

    fn signal_plan_execution_id(&self, signal: &EngineSignal) -> Option<String> {
        let node_owner = |id: &str| {
            self.repositories
                .node_executions
                .find_by_id(id)
                .ok()
                .flatten()
                .map(|node| node.plan_execution_id)
        };
        match signal {
            EngineSignal::StartNode(start) => Some(start.ambiance.plan_execution_id.clone()),
            EngineSignal::BeginNode { node_execution_id }
            | EngineSignal::RunNode { node_execution_id }
            | EngineSignal::CompleteWait { node_execution_id }
            | EngineSignal::InterventionExpired {
                node_execution_id, ..
            } => node_owner(node_execution_id),
            EngineSignal::StepResponse { correlation_id, .. } => self
                .repositories
                .node_executions
                .find_by_correlation_id(correlation_id)
                .ok()
                .flatten()
                .map(|node| node.plan_execution_id),
            EngineSignal::Interrupt { interrupt_id } => self
                .repositories
                .interrupts
                .find_by_id(interrupt_id)
                .ok()
                .flatten()
                .map(|interrupt| interrupt.plan_execution_id),
        }
    }
}

impl std::fmt::Debug for OrchestrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationEngine")
            .field("config", &self.config)
            .field("registries", &self.registries)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "orchestration_test.rs"]
mod tests;
