//! Fixtures shared by the engine scenario tests.

use super::{EngineBuilder, OrchestrationEngine};
use crate::events::{OrchestrationEventRecord, OrchestrationEventType, RecordingListener};
use crate::execution::{NodeExecution, PlanExecution};
use crate::facilitator::SYNC;
use crate::step::{
    AsyncExecutableResponse, Step, StepContext, StepError, StepResponse, TaskChainLink,
};
use crate::task::{ResponseData, TaskExecutor, TaskExecutorError, TaskRequest};
use crate::timeout::ManualClock;
use parking_lot::Mutex;
use pms_core::{Ambiance, FacilitatorObtainment, Plan, PlanNode, StepType};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) const START_MS: i64 = 1_700_000_000_000;

pub(crate) struct Harness {
    pub engine: OrchestrationEngine,
    pub clock: Arc<ManualClock>,
    pub tasks: Arc<RecordingTaskExecutor>,
    pub events: Arc<RecordingListener>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    pub fn with(configure: impl FnOnce(EngineBuilder) -> EngineBuilder) -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        let tasks = Arc::new(RecordingTaskExecutor::default());
        let builder = OrchestrationEngine::builder()
            .clock(clock.clone())
            .task_executor(tasks.clone());
        let engine = configure(builder).build().expect("engine must build");
        let events = Arc::new(RecordingListener::default());
        engine.events().subscribe(events.clone());
        Self {
            engine,
            clock,
            tasks,
            events,
        }
    }

    /// Starts the plan and drains the queue.
    pub fn start(&self, plan: Plan, inputs: Value) -> PlanExecution {
        let execution = self
            .engine
            .start_execution(plan, inputs)
            .expect("execution must start");
        self.drain();
        execution
    }

    pub fn drain(&self) -> usize {
        self.engine.run_until_idle().expect("queue must drain")
    }

    /// Moves the clock, fires due timeouts and drains.
    pub fn advance(&self, ms: i64) -> usize {
        self.clock.advance(ms);
        let fired = self.engine.check_timeouts().expect("timeouts must fire");
        self.drain();
        fired
    }

    pub fn execution(&self, id: &str) -> PlanExecution {
        self.engine.plan_execution(id).expect("execution must exist")
    }

    pub fn attempts(&self, plan_execution_id: &str, identifier: &str) -> Vec<NodeExecution> {
        self.engine
            .node_executions(plan_execution_id)
            .expect("nodes must load")
            .into_iter()
            .filter(|node| node.identifier == identifier)
            .collect()
    }

    /// The latest attempt of the node with `identifier`.
    pub fn node(&self, plan_execution_id: &str, identifier: &str) -> NodeExecution {
        self.attempts(plan_execution_id, identifier)
            .into_iter()
            .rfind(|node| !node.old_retry)
            .unwrap_or_else(|| panic!("node `{identifier}` must exist"))
    }

    pub fn event_types(&self, plan_execution_id: &str) -> Vec<OrchestrationEventType> {
        self.records(plan_execution_id)
            .into_iter()
            .map(|record| record.event.event_type)
            .collect()
    }

    pub fn records(&self, plan_execution_id: &str) -> Vec<OrchestrationEventRecord> {
        self.events.records_for(plan_execution_id)
    }

    /// Answers the single task queued for `node` and drains.
    pub fn answer_task(&self, node: &NodeExecution, response: ResponseData) -> bool {
        let correlation_id = node
            .waiting
            .as_ref()
            .and_then(|waiting| waiting.correlation_ids.first())
            .cloned()
            .expect("node must wait on a task");
        let recorded = self
            .engine
            .handle_step_response(&correlation_id, response)
            .expect("response must apply");
        self.drain();
        recorded
    }
}

pub(crate) fn plan(start: &str, nodes: Vec<PlanNode>) -> Plan {
    Plan::new("plan", start, nodes).expect("plan must validate")
}

pub(crate) fn node(id: &str, step_type: &str, facilitator: &str) -> PlanNode {
    PlanNode::new(id, id, StepType::step(step_type)).with_facilitator(FacilitatorObtainment::new(facilitator))
}

pub(crate) fn sync_node(id: &str, step_type: &str) -> PlanNode {
    node(id, step_type, SYNC)
}

/// Sync step answering from a script; an exhausted script answers SUCCEEDED.
#[derive(Default)]
pub(crate) struct ScriptedStep {
    script: Mutex<VecDeque<StepResponse>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(Value, BTreeMap<String, Value>)>>,
}

impl ScriptedStep {
    pub fn new(script: Vec<StepResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Parameters and inputs of every call.
    pub fn seen(&self) -> Vec<(Value, BTreeMap<String, Value>)> {
        self.seen.lock().clone()
    }
}

impl Step for ScriptedStep {
    fn execute_sync(&self, ctx: &StepContext<'_>) -> Result<StepResponse, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push((ctx.parameters.clone(), ctx.inputs.clone()));
        Ok(self.script.lock().pop_front().unwrap_or_else(StepResponse::succeeded))
    }
}

/// Hands its parameters to the task executor.
#[derive(Debug, Default)]
pub(crate) struct ShellTaskStep {
    aborted: AtomicUsize,
}

impl ShellTaskStep {
    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }
}

impl Step for ShellTaskStep {
    fn obtain_task(&self, ctx: &StepContext<'_>) -> Result<TaskRequest, StepError> {
        Ok(TaskRequest::new("shell", ctx.parameters.clone()))
    }

    fn handle_abort(&self, _ambiance: &Ambiance, _plan_node: &PlanNode) {
        self.aborted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Waits for two callbacks named after the node.
#[derive(Debug, Default)]
pub(crate) struct CallbackStep;

impl CallbackStep {
    pub fn callback_ids(node_execution_id: &str) -> Vec<String> {
        vec![format!("{node_execution_id}-a"), format!("{node_execution_id}-b")]
    }
}

impl Step for CallbackStep {
    fn execute_async(&self, ctx: &StepContext<'_>) -> Result<AsyncExecutableResponse, StepError> {
        let runtime_id = ctx.ambiance.current_runtime_id().unwrap_or_default();
        Ok(AsyncExecutableResponse {
            callback_ids: Self::callback_ids(runtime_id),
        })
    }
}

/// Two-link chain: `build` then `deploy`, the deploy task receiving the build artifact.
#[derive(Debug, Default)]
pub(crate) struct BuildDeployChain;

impl Step for BuildDeployChain {
    fn start_chain(&self, _ctx: &StepContext<'_>) -> Result<TaskChainLink, StepError> {
        Ok(TaskChainLink {
            task_request: TaskRequest::new("build", json!({})),
            chain_end: false,
            pass_through: json!({"links": 1}),
        })
    }

    fn next_chain_link(
        &self,
        _ctx: &StepContext<'_>,
        response: &ResponseData,
        pass_through: &Value,
    ) -> Result<TaskChainLink, StepError> {
        let artifact = match response {
            ResponseData::Success { payload } => payload["artifact"].clone(),
            ResponseData::Error { .. } => Value::Null,
        };
        let links = pass_through["links"].as_u64().unwrap_or_default() + 1;
        Ok(TaskChainLink {
            task_request: TaskRequest::new("deploy", json!({"artifact": artifact})),
            chain_end: true,
            pass_through: json!({"links": links}),
        })
    }

    fn finalize_chain(
        &self,
        _ctx: &StepContext<'_>,
        response: &ResponseData,
        pass_through: &Value,
    ) -> Result<StepResponse, StepError> {
        Ok(match response.failure_info() {
            Some(failure) => StepResponse::failed(failure),
            None => StepResponse::succeeded().with_outcome("links", pass_through["links"].clone()),
        })
    }
}

/// Task executor that records every call and never runs anything.
#[derive(Debug, Default)]
pub(crate) struct RecordingTaskExecutor {
    queued: Mutex<Vec<TaskRequest>>,
    aborted: Mutex<Vec<String>>,
    expired: Mutex<Vec<String>>,
    reject: AtomicBool,
}

impl RecordingTaskExecutor {
    pub fn queued(&self) -> Vec<TaskRequest> {
        self.queued.lock().clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().clone()
    }

    pub fn expired(&self) -> Vec<String> {
        self.expired.lock().clone()
    }

    pub fn reject_dispatch(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }
}

impl TaskExecutor for RecordingTaskExecutor {
    fn queue_task(
        &self,
        _setup_abstractions: &BTreeMap<String, String>,
        request: &TaskRequest,
        _hold_for_ms: u64,
    ) -> Result<String, TaskExecutorError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(TaskExecutorError::Dispatch {
                reason: "delegate offline".to_string(),
            });
        }
        let mut queued = self.queued.lock();
        queued.push(request.clone());
        Ok(format!("task-{}", queued.len()))
    }

    fn expire_task(&self, task_id: &str) -> Result<(), TaskExecutorError> {
        self.expired.lock().push(task_id.to_string());
        Ok(())
    }

    fn abort_task(&self, task_id: &str) -> Result<(), TaskExecutorError> {
        self.aborted.lock().push(task_id.to_string());
        Ok(())
    }

    fn execute_task(
        &self,
        _setup_abstractions: &BTreeMap<String, String>,
        request: &TaskRequest,
    ) -> Result<ResponseData, TaskExecutorError> {
        Err(TaskExecutorError::Unsupported {
            task_type: request.task_type.clone(),
        })
    }
}
