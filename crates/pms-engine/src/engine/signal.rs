use crate::adviser::RepairAction;
use crate::task::ResponseData;
use parking_lot::Mutex;
use pms_core::Ambiance;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Request to create a node execution for `node_id` below `ambiance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStart {
    pub ambiance: Ambiance,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_ids: Vec<String>,
    #[serde(default)]
    pub retry_index: u32,
    /// Delay before the node begins; used for retry backoff.
    #[serde(default)]
    pub delay_ms: u64,
}

impl NodeStart {
    pub fn new(ambiance: Ambiance, node_id: impl Into<String>) -> Self {
        Self {
            ambiance,
            node_id: node_id.into(),
            parent_id: None,
            previous_id: None,
            retry_ids: Vec::new(),
            retry_index: 0,
            delay_ms: 0,
        }
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_previous(mut self, previous_id: impl Into<String>) -> Self {
        self.previous_id = Some(previous_id.into());
        self
    }
}

/// Unit of work for the engine. Every state change is driven by exactly one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineSignal {
    StartNode(NodeStart),
    BeginNode {
        node_execution_id: String,
    },
    RunNode {
        node_execution_id: String,
    },
    CompleteWait {
        node_execution_id: String,
    },
    StepResponse {
        correlation_id: String,
        response: ResponseData,
    },
    Interrupt {
        interrupt_id: String,
    },
    InterventionExpired {
        node_execution_id: String,
        action: RepairAction,
    },
}

impl EngineSignal {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineSignal::StartNode(_) => "START_NODE",
            EngineSignal::BeginNode { .. } => "BEGIN_NODE",
            EngineSignal::RunNode { .. } => "RUN_NODE",
            EngineSignal::CompleteWait { .. } => "COMPLETE_WAIT",
            EngineSignal::StepResponse { .. } => "STEP_RESPONSE",
            EngineSignal::Interrupt { .. } => "INTERRUPT",
            EngineSignal::InterventionExpired { .. } => "INTERVENTION_EXPIRED",
        }
    }
}

/// Transport between the engine and whatever drives it.
pub trait SignalQueue: Send + Sync {
    fn push(&self, signal: EngineSignal);

    /// Pull side for in-process draining. Push-only transports return `None`.
    fn pop(&self) -> Option<EngineSignal> {
        None
    }
}

/// FIFO queue drained by `OrchestrationEngine::run_until_idle`.
#[derive(Debug, Default)]
pub struct LocalSignalQueue {
    signals: Mutex<VecDeque<EngineSignal>>,
}

impl LocalSignalQueue {
    pub fn len(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.lock().is_empty()
    }
}

impl SignalQueue for LocalSignalQueue {
    fn push(&self, signal: EngineSignal) {
        self.signals.lock().push_back(signal);
    }

    fn pop(&self) -> Option<EngineSignal> {
        self.signals.lock().pop_front()
    }
}
