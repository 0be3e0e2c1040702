use super::keyed::{Registry, RegistryError};
use crate::adviser::{
    Adviser, IgnoreAdviser, ManualInterventionAdviser, OnFailAdviser, OnSuccessAdviser, RetryAdviser,
    IGNORE, MANUAL_INTERVENTION, ON_FAIL, ON_SUCCESS, RETRY,
};
use crate::facilitator::{
    AsyncFacilitator, ChildFacilitator, ChildrenFacilitator, Facilitator, SyncFacilitator,
    TaskChainFacilitator, TaskFacilitator, WaitFacilitator, ASYNC, CHILD, CHILDREN, SYNC, TASK,
    TASK_CHAIN, WAIT,
};
use crate::repository::OutputRepository;
use crate::resolver::{Resolver, ScopedOutputResolver};
use crate::step::{ForkStep, NoopStep, SectionStep, Step, WaitStep, FORK, NOOP, SECTION, WAIT_STEP};
use crate::timeout::{
    AbsoluteTimeoutTracker, ActiveTimeoutTracker, Clock, TimeoutTracker, ABSOLUTE_TIMEOUT, ACTIVE_TIMEOUT,
};
use pms_core::{RefType, StepCategory};
use std::sync::Arc;

/// A level group known to the engine and the step category it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelDescriptor {
    pub group: String,
    pub category: StepCategory,
}

const DEFAULT_LEVEL_GROUPS: [(&str, StepCategory); 5] = [
    ("PIPELINE", StepCategory::Pipeline),
    ("STAGE", StepCategory::Stage),
    ("STEP_GROUP", StepCategory::StepGroup),
    ("STEP", StepCategory::Step),
    ("STRATEGY", StepCategory::Strategy),
];

/// Every producer map the engine dispatches through. Populated once at boot.
pub struct EngineRegistries {
    pub steps: Registry<dyn Step>,
    pub facilitators: Registry<dyn Facilitator>,
    pub advisers: Registry<dyn Adviser>,
    pub resolvers: Registry<dyn Resolver>,
    pub timeout_trackers: Arc<Registry<dyn TimeoutTracker>>,
    pub levels: Registry<LevelDescriptor>,
}

impl EngineRegistries {
    pub fn empty() -> Self {
        Self {
            steps: Registry::new("step"),
            facilitators: Registry::new("facilitator"),
            advisers: Registry::new("adviser"),
            resolvers: Registry::new("resolver"),
            timeout_trackers: Arc::new(Registry::new("timeout_tracker")),
            levels: Registry::new("level"),
        }
    }

    /// Registries holding every built-in, with resolvers backed by `outputs`.
    pub fn with_defaults(outputs: Arc<dyn OutputRepository>, clock: Arc<dyn Clock>) -> Result<Self, RegistryError> {
        let registries = Self::empty();
        registries.register_defaults(outputs, clock)?;
        Ok(registries)
    }

    pub fn register_defaults(
        &self,
        outputs: Arc<dyn OutputRepository>,
        clock: Arc<dyn Clock>,
    ) -> Result<(), RegistryError> {
        self.steps.register(NOOP, Arc::new(NoopStep))?;
        self.steps.register(SECTION, Arc::new(SectionStep))?;
        self.steps.register(FORK, Arc::new(ForkStep))?;
        self.steps.register(WAIT_STEP, Arc::new(WaitStep))?;

        self.facilitators.register(SYNC, Arc::new(SyncFacilitator))?;
        self.facilitators.register(ASYNC, Arc::new(AsyncFacilitator))?;
        self.facilitators.register(CHILD, Arc::new(ChildFacilitator))?;
        self.facilitators.register(CHILDREN, Arc::new(ChildrenFacilitator))?;
        self.facilitators.register(TASK, Arc::new(TaskFacilitator))?;
        self.facilitators.register(TASK_CHAIN, Arc::new(TaskChainFacilitator))?;
        self.facilitators.register(WAIT, Arc::new(WaitFacilitator))?;

        self.advisers.register(ON_SUCCESS, Arc::new(OnSuccessAdviser))?;
        self.advisers.register(ON_FAIL, Arc::new(OnFailAdviser))?;
        self.advisers.register(RETRY, Arc::new(RetryAdviser))?;
        self.advisers
            .register(MANUAL_INTERVENTION, Arc::new(ManualInterventionAdviser))?;
        self.advisers.register(IGNORE, Arc::new(IgnoreAdviser))?;

        for ref_type in [RefType::SweepingOutput, RefType::Outcome] {
            self.resolvers.register(
                ref_type.registry_key(),
                Arc::new(ScopedOutputResolver::new(ref_type, outputs.clone(), clock.clone())),
            )?;
        }

        self.timeout_trackers
            .register(ACTIVE_TIMEOUT, Arc::new(ActiveTimeoutTracker))?;
        self.timeout_trackers
            .register(ABSOLUTE_TIMEOUT, Arc::new(AbsoluteTimeoutTracker))?;

        for (group, category) in DEFAULT_LEVEL_GROUPS {
            self.levels.register(
                group,
                Arc::new(LevelDescriptor {
                    group: group.to_string(),
                    category,
                }),
            )?;
        }
        Ok(())
    }

    pub fn resolver(&self, ref_type: RefType) -> Result<Arc<dyn Resolver>, RegistryError> {
        self.resolvers.obtain(ref_type.registry_key())
    }

    /// First registered group whose category matches, in key order.
    pub fn group_for_category(&self, category: StepCategory) -> Option<String> {
        self.levels
            .keys()
            .into_iter()
            .filter_map(|key| self.levels.get(&key))
            .find(|descriptor| descriptor.category == category)
            .map(|descriptor| descriptor.group.clone())
    }
}

impl std::fmt::Debug for EngineRegistries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistries")
            .field("steps", &self.steps.keys())
            .field("facilitators", &self.facilitators.keys())
            .field("advisers", &self.advisers.keys())
            .field("resolvers", &self.resolvers.keys())
            .field("timeout_trackers", &self.timeout_trackers.keys())
            .field("levels", &self.levels.keys())
            .finish()
    }
}

#[cfg(test)]
#[path = "registries_test.rs"]
mod tests;
