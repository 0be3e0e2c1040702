mod builtin;
mod types;

pub use builtin::{
    IgnoreAdviser, ManualInterventionAdviser, OnFailAdviser, OnSuccessAdviser, RetryAdviser, IGNORE,
    MANUAL_INTERVENTION, ON_FAIL, ON_SUCCESS, RETRY,
};
pub use types::{
    parse_adviser_parameters, repair_response, AdviseType, Adviser, AdviserError, AdviserResponse,
    AdvisingEvent, RepairAction,
};
