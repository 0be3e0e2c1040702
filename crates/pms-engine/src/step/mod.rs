mod builtin;
mod types;

pub use builtin::{ForkStep, NoopStep, SectionStep, WaitStep, FORK, NOOP, SECTION, WAIT_STEP};
pub use types::{
    aggregate_child_outcomes, AsyncExecutableResponse, ChildExecutableResponse, ChildOutcome,
    ChildrenExecutableResponse, Step, StepContext, StepError, StepOutput, StepResponse,
    TaskChainLink, WaitStepResponse,
};
