mod bus;
mod jsonl;
mod redact;
mod types;

pub use bus::{ChannelListener, EventBus, OrchestrationEventListener, RecordingListener};
pub use jsonl::{encode_event_jsonl_line, parse_event_jsonl, parse_event_jsonl_line};
pub use redact::{redact_event_record, redact_value, RedactMode, RedactOptions};
pub use types::{
    ensure_monotonic_sequence, EventSequenceError, OrchestrationEvent, OrchestrationEventRecord,
    OrchestrationEventType, ORCHESTRATION_EVENT_SCHEMA_0_0_1,
};
