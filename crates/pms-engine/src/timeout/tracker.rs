use pms_core::Status;
use serde::{Deserialize, Serialize};

pub const ACTIVE_TIMEOUT: &str = "ACTIVE";
pub const ABSOLUTE_TIMEOUT: &str = "ABSOLUTE";

/// Persisted countdown. `elapsed_ms` holds time banked before the last resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutTrackerState {
    pub tracker_type: String,
    pub timeout_ms: u64,
    #[serde(default)]
    pub elapsed_ms: u64,
    pub ticking: bool,
    pub resumed_at_ms: i64,
}

impl TimeoutTrackerState {
    pub fn started(tracker_type: impl Into<String>, timeout_ms: u64, now_ms: i64) -> Self {
        Self {
            tracker_type: tracker_type.into(),
            timeout_ms,
            elapsed_ms: 0,
            ticking: true,
            resumed_at_ms: now_ms,
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    pub fn elapsed_ms(&self, now_ms: i64) -> u64 {
        if self.ticking {
            self.elapsed_ms + (now_ms - self.resumed_at_ms).max(0) as u64
        } else {
            self.elapsed_ms
        }
    }

    pub fn remaining_ms(&self, now_ms: i64) -> u64 {
        self.timeout_ms.saturating_sub(self.elapsed_ms(now_ms))
    }

    /// Wall-clock expiry, or `None` while paused.
    pub fn expires_at_ms(&self) -> Option<i64> {
        self.ticking
            .then(|| self.resumed_at_ms + self.timeout_ms.saturating_sub(self.elapsed_ms) as i64)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.ticking && self.elapsed_ms(now_ms) >= self.timeout_ms
    }

    pub fn pause(&mut self, now_ms: i64) {
        if self.ticking {
            self.elapsed_ms = self.elapsed_ms(now_ms);
            self.ticking = false;
        }
    }

    pub fn resume(&mut self, now_ms: i64) {
        if !self.ticking {
            self.ticking = true;
            self.resumed_at_ms = now_ms;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdateTimeoutEvent {
    pub status: Status,
    pub ts_ms: i64,
}

pub trait TimeoutTracker: Send + Sync {
    fn tracker_type(&self) -> &'static str;

    fn start(&self, timeout_ms: u64, now_ms: i64) -> TimeoutTrackerState {
        TimeoutTrackerState::started(self.tracker_type(), timeout_ms, now_ms)
    }

    fn on_event(&self, state: &mut TimeoutTrackerState, event: &StatusUpdateTimeoutEvent);
}

/// Counts only time spent in flowing statuses. Task, async and timed waits keep the
/// clock running; PAUSED and INTERVENTION_WAITING stop it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActiveTimeoutTracker;

impl TimeoutTracker for ActiveTimeoutTracker {
    fn tracker_type(&self) -> &'static str {
        ACTIVE_TIMEOUT
    }

    fn on_event(&self, state: &mut TimeoutTrackerState, event: &StatusUpdateTimeoutEvent) {
        if event.status.is_flowing() {
            state.resume(event.ts_ms);
        } else {
            state.pause(event.ts_ms);
        }
    }
}

/// Wall-clock countdown that ignores status changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbsoluteTimeoutTracker;

impl TimeoutTracker for AbsoluteTimeoutTracker {
    fn tracker_type(&self) -> &'static str {
        ABSOLUTE_TIMEOUT
    }

    fn on_event(&self, _state: &mut TimeoutTrackerState, _event: &StatusUpdateTimeoutEvent) {}
}

#[cfg(test)]
#[path = "tracker_test.rs"]
mod tests;
