mod document;
mod types;
mod validate;

pub use document::{parse_plan_document, DocumentFormat, PlanDocument};
pub use types::{
    AdviserObtainment, FacilitatorObtainment, Plan, PlanNode, RefObject, RefType, SkipType,
    TimeoutObtainment,
};
pub use validate::validate_plan_nodes;
