mod builtin;
mod types;

pub use builtin::{
    AsyncFacilitator, ChildFacilitator, ChildrenFacilitator, SyncFacilitator, TaskChainFacilitator,
    TaskFacilitator, WaitFacilitator, ASYNC, CHILD, CHILDREN, SYNC, TASK, TASK_CHAIN, WAIT,
};
pub use types::{ExecutionMode, Facilitator, FacilitatorResponse};
