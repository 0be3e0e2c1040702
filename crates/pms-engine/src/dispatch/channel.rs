use crate::engine::{EngineSignal, SignalQueue};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::warn;

/// Push-only queue backed by an unbounded tokio channel. The matching
/// `SignalReceiver` feeds a `Dispatcher`.
#[derive(Debug, Clone)]
pub struct ChannelSignalQueue {
    sender: UnboundedSender<EngineSignal>,
}

#[derive(Debug)]
pub struct SignalReceiver {
    pub(super) receiver: UnboundedReceiver<EngineSignal>,
}

pub fn signal_channel() -> (ChannelSignalQueue, SignalReceiver) {
    let (sender, receiver) = unbounded_channel();
    (ChannelSignalQueue { sender }, SignalReceiver { receiver })
}

impl ChannelSignalQueue {
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl SignalQueue for ChannelSignalQueue {
    fn push(&self, signal: EngineSignal) {
        let kind = signal.kind();
        if self.sender.send(signal).is_err() {
            warn!(signal = kind, "signal dropped, dispatcher is gone");
        }
    }
}

impl SignalReceiver {
    pub async fn recv(&mut self) -> Option<EngineSignal> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EngineSignal> {
        self.receiver.try_recv().ok()
    }
}
