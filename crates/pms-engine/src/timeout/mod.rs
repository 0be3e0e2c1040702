mod clock;
mod instance;
mod service;
mod tracker;

pub use clock::{format_rfc3339, Clock, ManualClock, SystemClock};
pub use instance::{TimeoutCallback, TimeoutInstance};
pub use service::{TimeoutEngine, TimeoutError};
pub use tracker::{
    AbsoluteTimeoutTracker, ActiveTimeoutTracker, StatusUpdateTimeoutEvent, TimeoutTracker,
    TimeoutTrackerState, ABSOLUTE_TIMEOUT, ACTIVE_TIMEOUT,
};
