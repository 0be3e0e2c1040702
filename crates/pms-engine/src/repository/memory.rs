use super::store::{Document, InMemoryStore, RepositoryError};
use super::traits::{
    InterruptRepository, NodeExecutionCriteria, NodeExecutionRepository, OutputRepository,
    PlanExecutionRepository, PlanRepository, TimeoutInstanceRepository,
};
use crate::execution::{Interrupt, NodeExecution, PlanExecution};
use crate::resolver::OutputInstance;
use crate::timeout::TimeoutInstance;
use parking_lot::RwLock;
use pms_core::{Plan, RefType};
use std::collections::BTreeMap;
use std::sync::Arc;

impl Document for PlanExecution {
    fn document_id(&self) -> &str {
        &self.uuid
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Document for NodeExecution {
    fn document_id(&self) -> &str {
        &self.uuid
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Document for Interrupt {
    fn document_id(&self) -> &str {
        &self.uuid
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Document for TimeoutInstance {
    fn document_id(&self) -> &str {
        &self.uuid
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

#[derive(Default)]
pub struct InMemoryPlanRepository {
    plans: RwLock<BTreeMap<String, Arc<Plan>>>,
}

impl PlanRepository for InMemoryPlanRepository {
    fn save_plan(&self, plan: Plan) -> Result<Arc<Plan>, RepositoryError> {
        let mut plans = self.plans.write();
        if let Some(existing) = plans.get(&plan.uuid) {
            if **existing == plan {
                return Ok(existing.clone());
            }
            return Err(RepositoryError::AlreadyExists {
                collection: "plan",
                id: plan.uuid,
            });
        }
        let plan = Arc::new(plan);
        plans.insert(plan.uuid.clone(), plan.clone());
        Ok(plan)
    }

    fn find_plan(&self, plan_id: &str) -> Result<Option<Arc<Plan>>, RepositoryError> {
        Ok(self.plans.read().get(plan_id).cloned())
    }
}

pub struct InMemoryPlanExecutionRepository {
    store: InMemoryStore<PlanExecution>,
}

impl Default for InMemoryPlanExecutionRepository {
    fn default() -> Self {
        Self {
            store: InMemoryStore::new("plan_execution"),
        }
    }
}

impl PlanExecutionRepository for InMemoryPlanExecutionRepository {
    fn save(&self, execution: PlanExecution) -> Result<PlanExecution, RepositoryError> {
        self.store.insert(execution)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<PlanExecution>, RepositoryError> {
        Ok(self.store.get(id))
    }

    fn find_all(&self) -> Result<Vec<PlanExecution>, RepositoryError> {
        Ok(self.store.filter(|_| true))
    }

    fn compare_and_swap(&self, execution: PlanExecution) -> Result<PlanExecution, RepositoryError> {
        self.store.compare_and_swap(execution)
    }
}

pub struct InMemoryNodeExecutionRepository {
    store: InMemoryStore<NodeExecution>,
}

impl Default for InMemoryNodeExecutionRepository {
    fn default() -> Self {
        Self {
            store: InMemoryStore::new("node_execution"),
        }
    }
}

impl NodeExecutionRepository for InMemoryNodeExecutionRepository {
    fn save(&self, node: NodeExecution) -> Result<NodeExecution, RepositoryError> {
        self.store.insert(node)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<NodeExecution>, RepositoryError> {
        Ok(self.store.get(id))
    }

    fn find_all(&self, criteria: &NodeExecutionCriteria) -> Result<Vec<NodeExecution>, RepositoryError> {
        let mut nodes = self.store.filter(|node| criteria.matches(node));
        nodes.sort_by(|left, right| {
            left.start_ts
                .cmp(&right.start_ts)
                .then_with(|| left.uuid.cmp(&right.uuid))
        });
        Ok(nodes)
    }

    fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<NodeExecution>, RepositoryError> {
        Ok(self.store.find_first(|node| {
            node.waiting.as_ref().is_some_and(|waiting| {
                waiting
                    .correlation_ids
                    .iter()
                    .any(|candidate| candidate == correlation_id)
            })
        }))
    }

    fn compare_and_swap(&self, node: NodeExecution) -> Result<NodeExecution, RepositoryError> {
        self.store.compare_and_swap(node)
    }
}

pub struct InMemoryInterruptRepository {
    store: InMemoryStore<Interrupt>,
}

impl Default for InMemoryInterruptRepository {
    fn default() -> Self {
        Self {
            store: InMemoryStore::new("interrupt"),
        }
    }
}

impl InterruptRepository for InMemoryInterruptRepository {
    fn save(&self, interrupt: Interrupt) -> Result<Interrupt, RepositoryError> {
        self.store.insert(interrupt)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Interrupt>, RepositoryError> {
        Ok(self.store.get(id))
    }

    fn find_by_plan_execution(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>, RepositoryError> {
        let mut interrupts = self
            .store
            .filter(|interrupt| interrupt.plan_execution_id == plan_execution_id);
        interrupts.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.uuid.cmp(&right.uuid))
        });
        Ok(interrupts)
    }

    fn compare_and_swap(&self, interrupt: Interrupt) -> Result<Interrupt, RepositoryError> {
        self.store.compare_and_swap(interrupt)
    }
}

pub struct InMemoryTimeoutInstanceRepository {
    store: InMemoryStore<TimeoutInstance>,
}

impl Default for InMemoryTimeoutInstanceRepository {
    fn default() -> Self {
        Self {
            store: InMemoryStore::new("timeout_instance"),
        }
    }
}

impl TimeoutInstanceRepository for InMemoryTimeoutInstanceRepository {
    fn save(&self, instance: TimeoutInstance) -> Result<TimeoutInstance, RepositoryError> {
        self.store.insert(instance)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<TimeoutInstance>, RepositoryError> {
        Ok(self.store.get(id))
    }

    fn find_all(&self) -> Result<Vec<TimeoutInstance>, RepositoryError> {
        Ok(self.store.filter(|_| true))
    }

    fn find_by_node_execution(&self, node_execution_id: &str) -> Result<Vec<TimeoutInstance>, RepositoryError> {
        Ok(self
            .store
            .filter(|instance| instance.node_execution_id == node_execution_id))
    }

    fn compare_and_swap(&self, instance: TimeoutInstance) -> Result<TimeoutInstance, RepositoryError> {
        self.store.compare_and_swap(instance)
    }

    fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        Ok(self.store.remove(id).is_some())
    }
}

type OutputKey = (String, RefType, String, String);

#[derive(Default)]
pub struct InMemoryOutputRepository {
    outputs: RwLock<BTreeMap<OutputKey, OutputInstance>>,
}

fn output_key(output: &OutputInstance) -> OutputKey {
    (
        output.plan_execution_id.clone(),
        output.ref_type,
        output.level_runtime_id_idx.clone(),
        output.name.clone(),
    )
}

impl OutputRepository for InMemoryOutputRepository {
    fn insert(&self, output: OutputInstance) -> Result<OutputInstance, RepositoryError> {
        let key = output_key(&output);
        let mut outputs = self.outputs.write();
        if outputs.contains_key(&key) {
            return Err(RepositoryError::AlreadyExists {
                collection: "output",
                id: format!("{}@{}", output.name, output.level_runtime_id_idx),
            });
        }
        outputs.insert(key, output.clone());
        Ok(output)
    }

    fn overwrite(&self, output: OutputInstance) -> Result<OutputInstance, RepositoryError> {
        self.outputs.write().insert(output_key(&output), output.clone());
        Ok(output)
    }

    fn find(
        &self,
        plan_execution_id: &str,
        ref_type: RefType,
        level_runtime_id_idx: &str,
        name: &str,
    ) -> Result<Option<OutputInstance>, RepositoryError> {
        let key = (
            plan_execution_id.to_string(),
            ref_type,
            level_runtime_id_idx.to_string(),
            name.to_string(),
        );
        Ok(self.outputs.read().get(&key).cloned())
    }

    fn find_by_plan_execution(&self, plan_execution_id: &str) -> Result<Vec<OutputInstance>, RepositoryError> {
        Ok(self
            .outputs
            .read()
            .values()
            .filter(|output| output.plan_execution_id == plan_execution_id)
            .cloned()
            .collect())
    }
}

/// Every repository the engine talks to.
#[derive(Clone)]
pub struct Repositories {
    pub plans: Arc<dyn PlanRepository>,
    pub plan_executions: Arc<dyn PlanExecutionRepository>,
    pub node_executions: Arc<dyn NodeExecutionRepository>,
    pub interrupts: Arc<dyn InterruptRepository>,
    pub timeouts: Arc<dyn TimeoutInstanceRepository>,
    pub outputs: Arc<dyn OutputRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            plans: Arc::new(InMemoryPlanRepository::default()),
            plan_executions: Arc::new(InMemoryPlanExecutionRepository::default()),
            node_executions: Arc::new(InMemoryNodeExecutionRepository::default()),
            interrupts: Arc::new(InMemoryInterruptRepository::default()),
            timeouts: Arc::new(InMemoryTimeoutInstanceRepository::default()),
            outputs: Arc::new(InMemoryOutputRepository::default()),
        }
    }
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}
