mod config;
mod error;
mod interrupts;
mod nodes;
mod orchestration;
mod responses;
mod signal;
mod summary;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{EngineConfig, MatchPolicy};
pub use error::{EngineError, InterruptError};
pub use orchestration::{EngineBuilder, OrchestrationEngine};
pub use signal::{EngineSignal, LocalSignalQueue, NodeStart, SignalQueue};
pub use summary::{ExecutionSummary, NodeSummary};
