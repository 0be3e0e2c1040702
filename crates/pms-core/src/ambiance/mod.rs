mod context;
mod level;

pub use context::{Ambiance, SETUP_ACCOUNT_ID, SETUP_ORG_IDENTIFIER, SETUP_PROJECT_IDENTIFIER};
pub use level::{Level, StepCategory, StepType};
