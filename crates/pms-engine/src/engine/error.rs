use crate::execution::InterruptType;
use crate::registry::RegistryError;
use crate::repository::RepositoryError;
use crate::resolver::ResolverError;
use crate::timeout::TimeoutError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterruptError {
    #[error("an unprocessed {interrupt_type} interrupt is already registered for this target")]
    Duplicate { interrupt_type: InterruptType },
    #[error("{interrupt_type} does not apply: {reason}")]
    NotApplicable {
        interrupt_type: InterruptType,
        reason: String,
    },
    #[error("plan execution `{plan_execution_id}` has already finished")]
    PlanExecutionFinished { plan_execution_id: String },
    #[error("node execution `{node_execution_id}` is not part of plan execution `{plan_execution_id}`")]
    NodeNotInExecution {
        plan_execution_id: String,
        node_execution_id: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Interrupt(#[from] InterruptError),
    #[error("plan `{plan_id}` is not stored")]
    PlanNotFound { plan_id: String },
    #[error("plan hash mismatch: checkpoint has {expected}, plan hashes to {actual}")]
    PlanHashMismatch { expected: String, actual: String },
    #[error("plan hashing failed: {0}")]
    Hash(#[from] serde_json::Error),
    #[error("signal limit of {limit} reached before the queue drained")]
    SignalLimit { limit: usize },
    #[error("plan execution `{plan_execution_id}` is misconfigured: {reason}")]
    Configuration {
        plan_execution_id: String,
        reason: String,
    },
}

impl EngineError {
    pub fn configuration(plan_execution_id: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Configuration {
            plan_execution_id: plan_execution_id.into(),
            reason: reason.into(),
        }
    }

    /// Errors that end the affected execution as FAILED instead of bubbling up.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::Configuration { .. }
                | EngineError::Registry(RegistryError::UnregisteredKeyAccess { .. })
                | EngineError::Timeout(TimeoutError::UnknownDimension { .. })
                | EngineError::PlanNotFound { .. }
        )
    }
}
