use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Queued,
    Running,
    AsyncWaiting,
    TaskWaiting,
    TimedWaiting,
    InterventionWaiting,
    Paused,
    Discontinuing,
    Succeeded,
    Failed,
    Errored,
    Expired,
    Aborted,
    Suspended,
    Skipped,
    IgnoreFailed,
}

const FINAL: &[Status] = &[
    Status::Succeeded,
    Status::Failed,
    Status::Errored,
    Status::Expired,
    Status::Aborted,
    Status::Suspended,
    Status::Skipped,
    Status::IgnoreFailed,
];

const NON_FINAL: &[Status] = &[
    Status::Queued,
    Status::Running,
    Status::AsyncWaiting,
    Status::TaskWaiting,
    Status::TimedWaiting,
    Status::InterventionWaiting,
    Status::Paused,
    Status::Discontinuing,
];

const FLOWING: &[Status] = &[
    Status::Queued,
    Status::Running,
    Status::AsyncWaiting,
    Status::TaskWaiting,
    Status::TimedWaiting,
    Status::Discontinuing,
];

const ACTIVE: &[Status] = &[
    Status::Queued,
    Status::Running,
    Status::AsyncWaiting,
    Status::TaskWaiting,
    Status::TimedWaiting,
    Status::Paused,
    Status::Discontinuing,
];

const PAUSABLE: &[Status] = &[
    Status::Queued,
    Status::Running,
    Status::AsyncWaiting,
    Status::TaskWaiting,
    Status::TimedWaiting,
];

const DISCONTINUABLE: &[Status] = &[
    Status::Queued,
    Status::Running,
    Status::AsyncWaiting,
    Status::TaskWaiting,
    Status::TimedWaiting,
    Status::InterventionWaiting,
    Status::Paused,
];

impl Status {
    pub const ALL: [Status; 16] = [
        Status::Queued,
        Status::Running,
        Status::AsyncWaiting,
        Status::TaskWaiting,
        Status::TimedWaiting,
        Status::InterventionWaiting,
        Status::Paused,
        Status::Discontinuing,
        Status::Succeeded,
        Status::Failed,
        Status::Errored,
        Status::Expired,
        Status::Aborted,
        Status::Suspended,
        Status::Skipped,
        Status::IgnoreFailed,
    ];

    pub fn final_statuses() -> &'static [Status] {
        FINAL
    }

    pub fn non_final_statuses() -> &'static [Status] {
        NON_FINAL
    }

    /// Terminal statuses are never left; a retry always produces a new node execution.
    pub fn is_terminal(self) -> bool {
        FINAL.contains(&self)
    }

    /// Statuses during which the node is making progress, so active timeouts keep ticking.
    pub fn is_flowing(self) -> bool {
        FLOWING.contains(&self)
    }

    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            Status::AsyncWaiting
                | Status::TaskWaiting
                | Status::TimedWaiting
                | Status::InterventionWaiting
        )
    }

    pub fn is_positive(self) -> bool {
        matches!(self, Status::Succeeded | Status::Skipped | Status::IgnoreFailed)
    }

    pub fn is_broken(self) -> bool {
        matches!(self, Status::Failed | Status::Errored | Status::Expired)
    }

    /// Statuses a node may hold immediately before moving to `self`.
    pub fn allowed_start_set(self) -> &'static [Status] {
        match self {
            Status::Queued => &[],
            Status::Running => &[
                Status::Queued,
                Status::AsyncWaiting,
                Status::TaskWaiting,
                Status::TimedWaiting,
                Status::Paused,
            ],
            Status::AsyncWaiting | Status::TaskWaiting => &[Status::Running, Status::Paused],
            Status::TimedWaiting => &[Status::Queued, Status::Running, Status::Paused],
            Status::InterventionWaiting => ACTIVE,
            Status::Paused => PAUSABLE,
            Status::Discontinuing => DISCONTINUABLE,
            Status::Skipped => &[Status::Queued],
            Status::Succeeded
            | Status::Failed
            | Status::Errored
            | Status::Expired
            | Status::Aborted
            | Status::Suspended
            | Status::IgnoreFailed => NON_FINAL,
        }
    }

    pub fn can_transition_to(self, to: Status) -> bool {
        to.allowed_start_set().contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "QUEUED",
            Status::Running => "RUNNING",
            Status::AsyncWaiting => "ASYNC_WAITING",
            Status::TaskWaiting => "TASK_WAITING",
            Status::TimedWaiting => "TIMED_WAITING",
            Status::InterventionWaiting => "INTERVENTION_WAITING",
            Status::Paused => "PAUSED",
            Status::Discontinuing => "DISCONTINUING",
            Status::Succeeded => "SUCCEEDED",
            Status::Failed => "FAILED",
            Status::Errored => "ERRORED",
            Status::Expired => "EXPIRED",
            Status::Aborted => "ABORTED",
            Status::Suspended => "SUSPENDED",
            Status::Skipped => "SKIPPED",
            Status::IgnoreFailed => "IGNORE_FAILED",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolls a set of node statuses up into the status of their aggregate.
pub fn calculate_status(statuses: impl IntoIterator<Item = Status>) -> Status {
    let statuses = statuses.into_iter().collect::<Vec<_>>();
    if statuses.is_empty() {
        return Status::Running;
    }

    let active = statuses
        .iter()
        .copied()
        .filter(|status| !status.is_terminal())
        .collect::<Vec<_>>();
    if !active.is_empty() {
        if active.contains(&Status::InterventionWaiting) {
            return Status::InterventionWaiting;
        }
        if active.iter().all(|status| *status == Status::Paused) {
            return Status::Paused;
        }
        return Status::Running;
    }

    for candidate in [
        Status::Aborted,
        Status::Expired,
        Status::Errored,
        Status::Failed,
        Status::Suspended,
    ] {
        if statuses.contains(&candidate) {
            return candidate;
        }
    }
    if statuses.iter().all(|status| *status == Status::Skipped) {
        return Status::Skipped;
    }
    Status::Succeeded
}

#[cfg(test)]
#[path = "status_test.rs"]
mod tests;
