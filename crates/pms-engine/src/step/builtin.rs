use super::types::{
    ChildExecutableResponse, ChildrenExecutableResponse, Step, StepContext, StepError, StepResponse,
    WaitStepResponse,
};
use serde::Deserialize;

pub const NOOP: &str = "NOOP";
pub const SECTION: &str = "SECTION";
pub const FORK: &str = "FORK";
pub const WAIT_STEP: &str = "WAIT";

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStep;

impl Step for NoopStep {
    fn execute_sync(&self, _ctx: &StepContext<'_>) -> Result<StepResponse, StepError> {
        Ok(StepResponse::succeeded())
    }
}

#[derive(Debug, Deserialize)]
struct SectionParameters {
    child_node_id: String,
}

/// Runs one child chain and takes its rolled-up status.
#[derive(Debug, Default, Clone, Copy)]
pub struct SectionStep;

impl Step for SectionStep {
    fn obtain_child(&self, ctx: &StepContext<'_>) -> Result<ChildExecutableResponse, StepError> {
        let parameters: SectionParameters = ctx.parameters_as()?;
        Ok(ChildExecutableResponse {
            child_node_id: parameters.child_node_id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ForkParameters {
    children: Vec<String>,
    #[serde(default)]
    max_concurrency: Option<usize>,
}

/// Fans out into parallel child chains and waits for all of them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForkStep;

impl Step for ForkStep {
    fn obtain_children(&self, ctx: &StepContext<'_>) -> Result<ChildrenExecutableResponse, StepError> {
        let parameters: ForkParameters = ctx.parameters_as()?;
        if parameters.max_concurrency == Some(0) {
            return Err(StepError::InvalidParameters {
                reason: "max_concurrency must be > 0".to_string(),
            });
        }
        Ok(ChildrenExecutableResponse {
            children: parameters.children,
            max_concurrency: parameters.max_concurrency,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WaitParameters {
    duration_ms: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WaitStep;

impl Step for WaitStep {
    fn obtain_wait(&self, ctx: &StepContext<'_>) -> Result<WaitStepResponse, StepError> {
        let parameters: WaitParameters = ctx.parameters_as()?;
        Ok(WaitStepResponse {
            duration_ms: parameters.duration_ms,
        })
    }
}

#[cfg(test)]
#[path = "builtin_test.rs"]
mod tests;
