use super::redact::{redact_event_record, RedactOptions};
use super::types::{OrchestrationEvent, OrchestrationEventRecord, OrchestrationEventType};
use crate::timeout::Clock;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Ended executions whose counters are kept for late events and checkpoints.
const RETIRED_CAPACITY: usize = 1024;
use tokio::sync::mpsc::UnboundedSender;

pub trait OrchestrationEventListener: Send + Sync {
    fn on_event(&self, record: &OrchestrationEventRecord);
}

/// Next sequence number per execution. Counters move from `live` to a bounded
/// `retired` set once ORCHESTRATION_END is published.
#[derive(Debug, Default)]
struct Sequences {
    live: BTreeMap<String, u64>,
    retired: BTreeMap<String, u64>,
    retired_order: VecDeque<String>,
}

impl Sequences {
    fn take_next(&mut self, plan_execution_id: &str) -> u64 {
        let next = match self.retired.get_mut(plan_execution_id) {
            Some(next) => next,
            None => self.live.entry(plan_execution_id.to_string()).or_insert(0),
        };
        let seq = *next;
        *next += 1;
        seq
    }

    fn peek(&self, plan_execution_id: &str) -> u64 {
        self.live
            .get(plan_execution_id)
            .or_else(|| self.retired.get(plan_execution_id))
            .copied()
            .unwrap_or(0)
    }

    fn retire(&mut self, plan_execution_id: &str, next_seq: u64) {
        self.live.remove(plan_execution_id);
        if self.retired.insert(plan_execution_id.to_string(), next_seq).is_some() {
            return;
        }
        self.retired_order.push_back(plan_execution_id.to_string());
        while self.retired_order.len() > RETIRED_CAPACITY {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
    }
}

/// Numbers events per plan execution and fans them out to listeners.
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn OrchestrationEventListener>>>,
    sequences: Mutex<Sequences>,
    redact: RedactOptions,
    clock: Arc<dyn Clock>,
}

impl EventBus {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            sequences: Mutex::new(Sequences::default()),
            redact: RedactOptions::default(),
            clock,
        }
    }

    pub fn with_redaction(mut self, redact: RedactOptions) -> Self {
        self.redact = redact;
        self
    }

    pub fn subscribe(&self, listener: Arc<dyn OrchestrationEventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn publish(&self, plan_execution_id: &str, event: OrchestrationEvent) -> OrchestrationEventRecord {
        let record = {
            let mut sequences = self.sequences.lock();
            let seq = sequences.take_next(plan_execution_id);
            if event.event_type == OrchestrationEventType::OrchestrationEnd {
                sequences.retire(plan_execution_id, seq + 1);
            }
            OrchestrationEventRecord::new(plan_execution_id, seq, self.clock.now_rfc3339(), event)
        };
        let record = redact_event_record(&record, &self.redact);
        tracing::debug!(
            plan_execution_id,
            seq = record.seq,
            event_type = ?record.event.event_type,
            "orchestration event"
        );
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_event(&record);
        }
        record
    }

    pub fn next_seq(&self, plan_execution_id: &str) -> u64 {
        self.sequences.lock().peek(plan_execution_id)
    }

    /// Continues numbering after a restored checkpoint. A finished execution goes
    /// straight to the retired set.
    pub fn set_next_seq(&self, plan_execution_id: &str, next_seq: u64, finished: bool) {
        let mut sequences = self.sequences.lock();
        if finished {
            sequences.retire(plan_execution_id, next_seq);
        } else {
            sequences.live.insert(plan_execution_id.to_string(), next_seq);
        }
    }

    /// Executions that have not published ORCHESTRATION_END yet.
    pub fn live_executions(&self) -> usize {
        self.sequences.lock().live.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.read().len())
            .field("redact", &self.redact)
            .finish()
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingListener {
    records: Mutex<Vec<OrchestrationEventRecord>>,
}

impl RecordingListener {
    pub fn records(&self) -> Vec<OrchestrationEventRecord> {
        self.records.lock().clone()
    }

    pub fn records_for(&self, plan_execution_id: &str) -> Vec<OrchestrationEventRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.plan_execution_id == plan_execution_id)
            .cloned()
            .collect()
    }
}

impl OrchestrationEventListener for RecordingListener {
    fn on_event(&self, record: &OrchestrationEventRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Forwards records to a tokio channel; a closed receiver drops them.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: UnboundedSender<OrchestrationEventRecord>,
}

impl ChannelListener {
    pub fn new(sender: UnboundedSender<OrchestrationEventRecord>) -> Self {
        Self { sender }
    }
}

impl OrchestrationEventListener for ChannelListener {
    fn on_event(&self, record: &OrchestrationEventRecord) {
        let _ = self.sender.send(record.clone());
    }
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod tests;
