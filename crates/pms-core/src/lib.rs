pub mod ambiance;
pub mod expression;
pub mod failure;
pub mod hash;
pub mod issues;
pub mod plan;
pub mod schema;
pub mod status;

pub use ambiance::{
    Ambiance, Level, StepCategory, StepType, SETUP_ACCOUNT_ID, SETUP_ORG_IDENTIFIER,
    SETUP_PROJECT_IDENTIFIER,
};
pub use expression::{
    evaluate, evaluate_condition, materialize_value, select_path, Expression, ExpressionError,
    RefLookup,
};
pub use failure::{FailureInfo, FailureType};
pub use hash::{plan_hash, stable_hash_hex};
pub use issues::{IssuePath, IssueSeverity, PathSegment, PlanIssue};
pub use plan::{
    parse_plan_document, validate_plan_nodes, AdviserObtainment, DocumentFormat,
    FacilitatorObtainment, Plan, PlanDocument, PlanNode, RefObject, RefType, SkipType,
    TimeoutObtainment,
};
pub use schema::{embedded_schema, validate_schema_instance, SCHEMA_PLAN_0_0_1};
pub use status::{calculate_status, Status};
