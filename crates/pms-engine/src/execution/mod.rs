mod types;

pub use types::{
    ChildrenState, Interrupt, InterruptEffect, InterruptType, NodeExecution, PlanExecution,
    WaitKind, WaitState,
};
