mod memory;
mod queries;
mod store;
mod traits;

pub use memory::{
    InMemoryInterruptRepository, InMemoryNodeExecutionRepository, InMemoryOutputRepository,
    InMemoryPlanExecutionRepository, InMemoryPlanRepository, InMemoryTimeoutInstanceRepository,
    Repositories,
};
pub use queries::{
    active_node_executions, error_out_active_nodes, find_descendants, require_node_execution,
    require_plan_execution, update_interrupt, update_node_execution, update_plan_execution,
};
pub use store::{cas_update, Document, InMemoryStore, RepositoryError};
pub use traits::{
    InterruptRepository, NodeExecutionCriteria, NodeExecutionRepository, OutputRepository,
    ParentFilter, PlanExecutionRepository, PlanRepository, TimeoutInstanceRepository,
};
