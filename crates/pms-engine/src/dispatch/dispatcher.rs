use super::channel::SignalReceiver;
use crate::engine::{EngineSignal, OrchestrationEngine};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherOptions {
    pub workers: usize,
    pub timeout_poll_interval_ms: u64,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout_poll_interval_ms: 50,
        }
    }
}

/// Worker pool that applies queued signals to an engine and polls its timeouts.
///
/// Signals for different executions run in parallel; the engine's repositories
/// serialize updates to a single document.
pub struct Dispatcher {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(
        engine: Arc<OrchestrationEngine>,
        receiver: SignalReceiver,
        options: DispatcherOptions,
    ) -> Self {
        let cancel = CancellationToken::new();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = options.workers.max(1);
        let mut handles = Vec::with_capacity(workers + 1);
        for worker in 0..workers {
            handles.push(tokio::spawn(run_worker(
                worker,
                engine.clone(),
                receiver.clone(),
                cancel.clone(),
            )));
        }
        handles.push(tokio::spawn(run_ticker(
            engine,
            Duration::from_millis(options.timeout_poll_interval_ms.max(1)),
            cancel.clone(),
        )));
        info!(workers, "dispatcher started");
        Self { cancel, handles }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops every worker and the ticker. A signal already being applied finishes first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for joined in join_all(self.handles).await {
            if let Err(err) = joined {
                warn!(error = %err, "dispatcher task ended abnormally");
            }
        }
        info!("dispatcher stopped");
    }
}

async fn run_worker(
    worker: usize,
    engine: Arc<OrchestrationEngine>,
    receiver: Arc<Mutex<SignalReceiver>>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => None,
            signal = next_signal(&receiver) => signal,
        };
        let Some(signal) = next else {
            break;
        };
        let kind = signal.kind();
        debug!(worker, signal = kind, "applying signal");
        let engine = engine.clone();
        match tokio::task::spawn_blocking(move || engine.process(signal)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(worker, signal = kind, error = %err, "signal failed"),
            Err(err) => error!(worker, signal = kind, error = %err, "signal worker panicked"),
        }
    }
    debug!(worker, "worker stopped");
}

async fn next_signal(receiver: &Mutex<SignalReceiver>) -> Option<EngineSignal> {
    receiver.lock().await.recv().await
}

async fn run_ticker(engine: Arc<OrchestrationEngine>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let engine = engine.clone();
        match tokio::task::spawn_blocking(move || engine.check_timeouts()).await {
            Ok(Ok(0)) => {}
            Ok(Ok(fired)) => debug!(fired, "timeouts fired"),
            Ok(Err(err)) => error!(error = %err, "timeout poll failed"),
            Err(err) => error!(error = %err, "timeout poll panicked"),
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
