use super::{InterruptType, WaitKind, WaitState};
use crate::task::ResponseData;
use serde_json::json;

#[test]
fn wait_state_completes_when_every_correlation_id_answered() {
    let mut state = WaitState::new(WaitKind::Async, vec!["cb-1".to_string(), "cb-2".to_string()]);
    assert!(!state.is_complete());
    state
        .responses
        .insert("cb-1".to_string(), ResponseData::success(json!(null)));
    assert!(!state.is_complete());
    state.responses.insert("cb-2".to_string(), ResponseData::error("late"));
    assert!(state.is_complete());
}

#[test]
fn intervention_interrupts_are_the_decision_set() {
    let deciding = [
        InterruptType::Retry,
        InterruptType::Ignore,
        InterruptType::MarkSuccess,
        InterruptType::MarkFailed,
    ];
    for interrupt_type in deciding {
        assert!(interrupt_type.requires_intervention(), "{interrupt_type}");
    }
    for interrupt_type in [
        InterruptType::Abort,
        InterruptType::Pause,
        InterruptType::Resume,
        InterruptType::Expire,
    ] {
        assert!(!interrupt_type.requires_intervention(), "{interrupt_type}");
    }
    assert_eq!(
        serde_json::to_value(InterruptType::MarkFailed).expect("must encode"),
        json!("MARK_FAILED")
    );
}
