pub mod adviser;
pub mod checkpoint;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod execution;
pub mod facilitator;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod step;
pub mod task;
pub mod timeout;

pub use adviser::{
    Adviser, AdviserError, AdviserResponse, AdvisingEvent, RepairAction, IGNORE,
    MANUAL_INTERVENTION, ON_FAIL, ON_SUCCESS, RETRY,
};
pub use checkpoint::{
    decode_checkpoint_json, encode_checkpoint_json, load_checkpoint_from_path,
    save_checkpoint_to_path, CheckpointStoreError, ExecutionCheckpoint, CHECKPOINT_SCHEMA_0_0_1,
};
pub use dispatch::{signal_channel, ChannelSignalQueue, Dispatcher, DispatcherOptions, SignalReceiver};
pub use engine::{
    EngineBuilder, EngineConfig, EngineError, EngineSignal, ExecutionSummary, InterruptError,
    LocalSignalQueue, MatchPolicy, NodeStart, NodeSummary, OrchestrationEngine, SignalQueue,
};
pub use events::{
    encode_event_jsonl_line, ensure_monotonic_sequence, parse_event_jsonl, parse_event_jsonl_line,
    ChannelListener, EventBus, OrchestrationEvent, OrchestrationEventListener,
    OrchestrationEventRecord, OrchestrationEventType, RecordingListener, RedactMode, RedactOptions,
    ORCHESTRATION_EVENT_SCHEMA_0_0_1,
};
pub use execution::{Interrupt, InterruptEffect, InterruptType, NodeExecution, PlanExecution};
pub use facilitator::{ExecutionMode, Facilitator, FacilitatorResponse};
pub use registry::{EngineRegistries, Registry, RegistryError};
pub use repository::{Repositories, RepositoryError};
pub use resolver::{OutputInstance, OutputScope, Resolver, ResolverError};
pub use step::{Step, StepContext, StepError, StepResponse};
pub use task::{ResponseData, TaskExecutor, TaskExecutorError, TaskRequest};
pub use timeout::{Clock, ManualClock, SystemClock, TimeoutCallback, TimeoutInstance};
