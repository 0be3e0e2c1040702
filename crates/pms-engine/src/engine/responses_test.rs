use super::super::test_support::{
    node, plan, sync_node, BuildDeployChain, CallbackStep, Harness, ScriptedStep, ShellTaskStep,
};
use super::super::{EngineConfig, MatchPolicy};
use crate::adviser::{IGNORE, MANUAL_INTERVENTION, ON_FAIL, ON_SUCCESS, RETRY};
use crate::execution::InterruptType;
use crate::facilitator::{ASYNC, CHILD, CHILDREN, TASK, TASK_CHAIN, WAIT};
use crate::step::{StepResponse, FORK, NOOP, SECTION, WAIT_STEP};
use crate::task::ResponseData;
use crate::timeout::ACTIVE_TIMEOUT;
use pms_core::{AdviserObtainment, FacilitatorObtainment, FailureInfo, FailureType, RefType, Status};
use serde_json::{json, Value};

fn then(next: &str) -> AdviserObtainment {
    AdviserObtainment::new(ON_SUCCESS, json!({"next_node_id": next}))
}

fn shell_harness() -> Harness {
    Harness::with(|builder| builder.step("SHELL", std::sync::Arc::new(ShellTaskStep::default())))
}

fn failing(times: usize) -> std::sync::Arc<ScriptedStep> {
    ScriptedStep::new(
        (0..times)
            .map(|attempt| StepResponse::failed(FailureInfo::application(format!("attempt {attempt} failed"))))
            .collect(),
    )
}

#[test]
fn retry_exhaustion_fails_the_plan() {
    let harness = shell_harness();
    let execution = harness.start(
        plan(
            "deploy",
            vec![node("deploy", "SHELL", TASK)
                .with_parameters(json!({"script": "./deploy.sh"}))
                .with_adviser(AdviserObtainment::new(
                    RETRY,
                    json!({"retry_count": 1, "wait_intervals_ms": [1000]}),
                ))],
        ),
        json!({}),
    );

    let first = harness.node(&execution.uuid, "deploy");
    assert_eq!(first.status, Status::TaskWaiting);
    assert!(harness.answer_task(&first, ResponseData::error("connection reset")));

    let retry = harness.node(&execution.uuid, "deploy");
    assert_ne!(retry.uuid, first.uuid);
    assert_eq!(retry.status, Status::Queued);
    assert_eq!(retry.retry_ids, vec![first.uuid.clone()]);
    assert_eq!(retry.ambiance.current_level().map(|level| level.retry_index), Some(1));
    assert_eq!(harness.tasks.queued().len(), 1);

    assert_eq!(harness.advance(999), 0);
    assert_eq!(harness.advance(1), 1);
    let retry = harness.node(&execution.uuid, "deploy");
    assert_eq!(retry.status, Status::TaskWaiting);
    assert_eq!(harness.tasks.queued().len(), 2);
    assert!(harness.answer_task(&retry, ResponseData::error("connection reset")));

    let attempts = harness.attempts(&execution.uuid, "deploy");
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].old_retry);
    assert_eq!(attempts[0].status, Status::Failed);
    assert_eq!(attempts[0].next_id.as_deref(), Some(attempts[1].uuid.as_str()));
    assert!(!attempts[1].old_retry);
    assert_eq!(attempts[1].status, Status::Failed);
    assert_eq!(harness.execution(&execution.uuid).status, Status::Failed);

    let summary = harness
        .engine
        .execution_summary(&execution.uuid)
        .expect("summary must build");
    assert_eq!(summary.attempts("deploy").len(), 2);
    assert!(summary.node("deploy").expect("latest attempt").retried);
}

#[test]
fn retry_then_success_overwrites_outputs() {
    let step = ScriptedStep::new(vec![
        StepResponse::failed(FailureInfo::application("flaky")).with_outcome("result", json!("first")),
        StepResponse::succeeded().with_outcome("result", json!("second")),
    ]);
    let harness = Harness::with(|builder| builder.step("SCRIPT", step.clone()));
    let execution = harness.start(
        plan(
            "test",
            vec![sync_node("test", "SCRIPT")
                .with_adviser(AdviserObtainment::new(RETRY, json!({"retry_count": 2})))],
        ),
        json!({}),
    );

    assert_eq!(step.calls(), 2);
    assert_eq!(harness.execution(&execution.uuid).status, Status::Succeeded);
    let outputs = harness
        .engine
        .repositories()
        .outputs
        .find_by_plan_execution(&execution.uuid)
        .expect("outputs must load");
    let results = outputs
        .iter()
        .filter(|output| output.ref_type == RefType::Outcome && output.name == "result")
        .collect::<Vec<_>>();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value, json!("second"));
}

#[test]
fn ignore_adviser_continues_past_failure() {
    let step = failing(1);
    let harness = Harness::with(|builder| builder.step("SCRIPT", step.clone()));
    let execution = harness.start(
        plan(
            "lint",
            vec![
                sync_node("lint", "SCRIPT").with_adviser(AdviserObtainment::new(IGNORE, json!({"next_node_id": "build"}))),
                sync_node("build", NOOP),
            ],
        ),
        json!({}),
    );

    assert_eq!(harness.node(&execution.uuid, "lint").status, Status::IgnoreFailed);
    assert_eq!(harness.node(&execution.uuid, "build").status, Status::Succeeded);
    assert_eq!(harness.execution(&execution.uuid).status, Status::Succeeded);
}

#[test]
fn on_fail_adviser_routes_to_rollback() {
    let step = failing(1);
    let harness = Harness::with(|builder| builder.step("SCRIPT", step.clone()));
    let execution = harness.start(
        plan(
            "deploy",
            vec![
                sync_node("deploy", "SCRIPT")
                    .with_adviser(then("verify"))
                    .with_adviser(AdviserObtainment::new(ON_FAIL, json!({"next_node_id": "rollback"}))),
                sync_node("verify", NOOP),
                sync_node("rollback", NOOP),
            ],
        ),
        json!({}),
    );

    assert!(harness.attempts(&execution.uuid, "verify").is_empty());
    assert_eq!(harness.node(&execution.uuid, "rollback").status, Status::Succeeded);
    assert_eq!(harness.execution(&execution.uuid).status, Status::Failed);
}

#[test]
fn exactly_one_policy_rejects_ambiguous_advisers() {
    let step = failing(1);
    let harness = Harness::with(|builder| {
        builder
            .step("SCRIPT", step.clone())
            .config(EngineConfig {
                match_policy: MatchPolicy::ExactlyOne,
                ..EngineConfig::default()
            })
    });
    let execution = harness.start(
        plan(
            "deploy",
            vec![sync_node("deploy", "SCRIPT")
                .with_adviser(AdviserObtainment::new(RETRY, json!({"retry_count": 1})))
                .with_adviser(AdviserObtainment::new(IGNORE, Value::Null))],
        ),
        json!({}),
    );

    let finished = harness.execution(&execution.uuid);
    assert_eq!(finished.status, Status::Failed);
    let failure = finished.failure_info.expect("failure must be recorded");
    assert!(failure.failure_types.contains(&FailureType::Configuration));
    assert!(failure.message.contains("RETRY, IGNORE"));
}

fn intervention_plan(parameters: Value) -> pms_core::Plan {
    plan(
        "approve",
        vec![
            sync_node("approve", "SCRIPT")
                .with_adviser(AdviserObtainment::new(MANUAL_INTERVENTION, parameters))
                .with_adviser(then("release")),
            sync_node("release", NOOP),
        ],
    )
}

#[test]
fn mark_success_resolves_intervention_wait() {
    let step = failing(1);
    let harness = Harness::with(|builder| builder.step("SCRIPT", step.clone()));
    let execution = harness.start(intervention_plan(json!({"timeout_ms": 60_000})), json!({}));

    let waiting = harness.node(&execution.uuid, "approve");
    assert_eq!(waiting.status, Status::InterventionWaiting);
    assert_eq!(waiting.pending_status, Some(Status::Failed));
    assert_eq!(harness.execution(&execution.uuid).status, Status::InterventionWaiting);

    harness
        .engine
        .register_interrupt(InterruptType::MarkSuccess, &execution.uuid, Some(&waiting.uuid), Value::Null)
        .expect("interrupt must register");
    harness.drain();

    let approve = harness.node(&execution.uuid, "approve");
    assert_eq!(approve.status, Status::Succeeded);
    assert!(approve.failure_info.is_none());
    assert!(approve.was_intervened());
    assert_eq!(harness.node(&execution.uuid, "release").status, Status::Succeeded);
    assert_eq!(harness.execution(&execution.uuid).status, Status::Succeeded);
    assert_eq!(harness.advance(60_000), 0, "intervention timer must be gone");
}

#[test]
fn intervention_wait_times_out_into_repair_action() {
    let step = failing(1);
    let harness = Harness::with(|builder| builder.step("SCRIPT", step.clone()));
    let execution = harness.start(
        intervention_plan(json!({"timeout_ms": 60_000, "timeout_action": "MARK_AS_FAILURE"})),
        json!({}),
    );

    assert_eq!(harness.advance(59_999), 0);
    assert_eq!(harness.node(&execution.uuid, "approve").status, Status::InterventionWaiting);
    assert_eq!(harness.advance(1), 1);

    assert_eq!(harness.node(&execution.uuid, "approve").status, Status::Failed);
    assert!(harness.attempts(&execution.uuid, "release").is_empty());
    assert_eq!(harness.execution(&execution.uuid).status, Status::Failed);
}

#[test]
fn retry_interrupt_reruns_intervention_node() {
    let step = failing(1);
    let harness = Harness::with(|builder| builder.step("SCRIPT", step.clone()));
    let execution = harness.start(intervention_plan(Value::Null), json!({}));
    let waiting = harness.node(&execution.uuid, "approve");

    harness
        .engine
        .register_interrupt(InterruptType::Retry, &execution.uuid, Some(&waiting.uuid), Value::Null)
        .expect("interrupt must register");
    harness.drain();

    assert_eq!(step.calls(), 2);
    let attempts = harness.attempts(&execution.uuid, "approve");
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].old_retry);
    assert_eq!(attempts[1].status, Status::Succeeded);
    assert_eq!(harness.execution(&execution.uuid).status, Status::Succeeded);
}

#[test]
fn async_node_waits_for_every_callback() {
    let harness = Harness::with(|builder| builder.step("CALLBACK", std::sync::Arc::new(CallbackStep)));
    let execution = harness.start(plan("notify", vec![node("notify", "CALLBACK", ASYNC)]), json!({}));

    let waiting = harness.node(&execution.uuid, "notify");
    assert_eq!(waiting.status, Status::AsyncWaiting);
    let [first, second] = <[String; 2]>::try_from(CallbackStep::callback_ids(&waiting.uuid))
        .expect("two callbacks");

    assert!(harness
        .engine
        .handle_step_response(&first, ResponseData::success(Value::Null))
        .expect("must record"));
    assert!(!harness
        .engine
        .handle_step_response(&first, ResponseData::success(Value::Null))
        .expect("duplicate must be ignored"));
    harness.drain();
    assert_eq!(harness.node(&execution.uuid, "notify").status, Status::AsyncWaiting);

    assert!(harness
        .engine
        .handle_step_response(&second, ResponseData::success(Value::Null))
        .expect("must record"));
    harness.drain();
    assert_eq!(harness.node(&execution.uuid, "notify").status, Status::Succeeded);
    assert_eq!(harness.execution(&execution.uuid).status, Status::Succeeded);
}

#[test]
fn duplicate_task_response_is_applied_once() {
    let harness = shell_harness();
    let execution = harness.start(
        plan("build", vec![node("build", "SHELL", TASK).with_adviser(then("ship")), sync_node("ship", NOOP)]),
        json!({}),
    );
    let waiting = harness.node(&execution.uuid, "build");

    assert!(harness.answer_task(&waiting, ResponseData::success(json!({"ok": true}))));
    assert!(!harness.answer_task(&waiting, ResponseData::success(json!({"ok": true}))));

    assert_eq!(harness.attempts(&execution.uuid, "ship").len(), 1);
    assert_eq!(harness.execution(&execution.uuid).status, Status::Succeeded);
}

#[test]
fn task_chain_feeds_each_link_into_the_next() {
    let harness = Harness::with(|builder| builder.step("BUILD_DEPLOY", std::sync::Arc::new(BuildDeployChain)));
    let execution = harness.start(
        plan("release", vec![node("release", "BUILD_DEPLOY", TASK_CHAIN)]),
        json!({}),
    );

    let build = harness.node(&execution.uuid, "release");
    assert!(harness.answer_task(&build, ResponseData::success(json!({"artifact": "app.tgz"}))));
    let deploy = harness.node(&execution.uuid, "release");
    assert_eq!(deploy.status, Status::TaskWaiting);
    assert_eq!(deploy.uuid, build.uuid);

    let queued = harness.tasks.queued();
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].task_type, "build");
    assert_eq!(queued[1].task_type, "deploy");
    assert_eq!(queued[1].parameters, json!({"artifact": "app.tgz"}));
    assert_ne!(queued[0].correlation_id, queued[1].correlation_id);

    assert!(harness.answer_task(&deploy, ResponseData::success(Value::Null)));
    assert_eq!(harness.execution(&execution.uuid).status, Status::Succeeded);
    let outputs = harness
        .engine
        .repositories()
        .outputs
        .find_by_plan_execution(&execution.uuid)
        .expect("outputs must load");
    assert!(outputs
        .iter()
        .any(|output| output.name == "links" && output.value == json!(2)));
}

#[test]
fn failed_task_dispatch_fails_the_node() {
    let harness = shell_harness();
    harness.tasks.reject_dispatch();
    let execution = harness.start(plan("build", vec![node("build", "SHELL", TASK)]), json!({}));

    let build = harness.node(&execution.uuid, "build");
    assert_eq!(build.status, Status::Failed);
    let failure = build.failure_info.expect("failure must be recorded");
    assert!(failure.failure_types.contains(&FailureType::Connectivity));
    assert!(failure.message.contains("delegate offline"));
}

#[test]
fn wait_step_resumes_when_its_timer_fires() {
    let harness = Harness::new();
    let execution = harness.start(
        plan(
            "soak",
            vec![
                node("soak", WAIT_STEP, WAIT)
                    .with_parameters(json!({"duration_ms": 5000}))
                    .with_adviser(then("promote")),
                sync_node("promote", NOOP),
            ],
        ),
        json!({}),
    );

    assert_eq!(harness.node(&execution.uuid, "soak").status, Status::TimedWaiting);
    assert_eq!(harness.advance(4999), 0);
    assert_eq!(harness.advance(1), 1);
    assert_eq!(harness.node(&execution.uuid, "soak").status, Status::Succeeded);
    assert_eq!(harness.execution(&execution.uuid).status, Status::Succeeded);
}

#[test]
fn facilitator_initial_wait_delays_the_task() {
    let harness = shell_harness();
    let execution = harness.start(
        plan(
            "build",
            vec![pms_core::PlanNode::new("build", "build", pms_core::StepType::step("SHELL"))
                .with_facilitator(FacilitatorObtainment::new(TASK).with_parameters(json!({"wait_duration_ms": 2000})))],
        ),
        json!({}),
    );

    assert_eq!(harness.node(&execution.uuid, "build").status, Status::TimedWaiting);
    assert!(harness.tasks.queued().is_empty());
    harness.advance(2000);
    assert_eq!(harness.node(&execution.uuid, "build").status, Status::TaskWaiting);
    assert_eq!(harness.tasks.queued().len(), 1);
}

#[test]
fn node_timeout_expires_a_hanging_task() {
    let harness = shell_harness();
    let execution = harness.start(
        plan(
            "build",
            vec![node("build", "SHELL", TASK).with_timeout(ACTIVE_TIMEOUT, 10_000)],
        ),
        json!({}),
    );

    assert_eq!(harness.advance(10_000), 1);
    let build = harness.node(&execution.uuid, "build");
    assert_eq!(build.status, Status::Expired);
    assert!(build
        .failure_info
        .expect("failure must be recorded")
        .failure_types
        .contains(&FailureType::Timeout));
    assert_eq!(harness.tasks.expired(), vec!["task-1".to_string()]);
    assert_eq!(harness.execution(&execution.uuid).status, Status::Expired);
}

fn fork_plan(max_concurrency: Option<usize>) -> pms_core::Plan {
    plan(
        "fanout",
        vec![
            node("fanout", FORK, CHILDREN).with_parameters(json!({
                "children": ["east", "west", "south"],
                "max_concurrency": max_concurrency,
            })),
            node("east", "SHELL", TASK),
            node("west", "SHELL", TASK),
            node("south", "SHELL", TASK),
        ],
    )
}

#[test]
fn fork_respects_max_concurrency() {
    let harness = shell_harness();
    let execution = harness.start(fork_plan(Some(1)), json!({}));

    let fanout = harness.node(&execution.uuid, "fanout");
    assert_eq!(fanout.status, Status::Running);
    assert_eq!(fanout.children.as_ref().map(|children| children.pending), Some(3));
    assert!(harness.attempts(&execution.uuid, "west").is_empty());

    for (current, next) in [("east", Some("west")), ("west", Some("south")), ("south", None)] {
        let child = harness.node(&execution.uuid, current);
        assert_eq!(child.parent_id.as_deref(), Some(fanout.uuid.as_str()));
        assert_eq!(child.ambiance.depth(), 2);
        harness.answer_task(&child, ResponseData::success(Value::Null));
        if let Some(next) = next {
            assert_eq!(harness.node(&execution.uuid, next).status, Status::TaskWaiting);
        }
    }

    assert_eq!(harness.node(&execution.uuid, "fanout").status, Status::Succeeded);
    assert_eq!(harness.execution(&execution.uuid).status, Status::Succeeded);
}

#[test]
fn fork_rolls_up_a_failed_child() {
    let harness = shell_harness();
    let execution = harness.start(fork_plan(None), json!({}));
    assert_eq!(harness.tasks.queued().len(), 3);

    harness.answer_task(&harness.node(&execution.uuid, "east"), ResponseData::success(Value::Null));
    harness.answer_task(&harness.node(&execution.uuid, "west"), ResponseData::error("disk full"));
    assert_eq!(harness.node(&execution.uuid, "fanout").status, Status::Running);
    harness.answer_task(&harness.node(&execution.uuid, "south"), ResponseData::success(Value::Null));

    let fanout = harness.node(&execution.uuid, "fanout");
    assert_eq!(fanout.status, Status::Failed);
    assert_eq!(
        fanout.failure_info.expect("failure must be recorded").message,
        "disk full"
    );
    assert_eq!(harness.execution(&execution.uuid).status, Status::Failed);
}

#[test]
fn ending_the_execution_releases_sibling_tasks() {
    let shell = std::sync::Arc::new(ShellTaskStep::default());
    let harness = Harness::with(|builder| builder.step("SHELL", shell.clone()));
    let execution = harness.start(
        plan(
            "fanout",
            vec![
                node("fanout", FORK, CHILDREN).with_parameters(json!({"children": ["east", "west"]})),
                node("east", "SHELL", TASK).with_adviser(AdviserObtainment::new(
                    RETRY,
                    json!({"retry_count": 0, "repair_action_after_retry": "END_EXECUTION"}),
                )),
                node("west", "SHELL", TASK),
            ],
        ),
        json!({}),
    );
    let west_tasks = harness
        .node(&execution.uuid, "west")
        .waiting
        .map(|waiting| waiting.task_ids)
        .unwrap_or_default();
    assert_eq!(west_tasks.len(), 1);

    harness.answer_task(&harness.node(&execution.uuid, "east"), ResponseData::error("region down"));

    assert_eq!(harness.execution(&execution.uuid).status, Status::Failed);
    assert_eq!(harness.node(&execution.uuid, "east").status, Status::Failed);
    assert_eq!(harness.node(&execution.uuid, "west").status, Status::Aborted);
    assert_eq!(harness.node(&execution.uuid, "fanout").status, Status::Aborted);
    assert_eq!(harness.tasks.aborted(), west_tasks);
    assert_eq!(shell.aborted(), 1);
}

#[test]
fn section_runs_its_child_chain() {
    let harness = Harness::new();
    let execution = harness.start(
        plan(
            "stage",
            vec![
                node("stage", SECTION, CHILD).with_parameters(json!({"child_node_id": "compile"})),
                sync_node("compile", NOOP).with_adviser(then("package")),
                sync_node("package", NOOP),
            ],
        ),
        json!({}),
    );

    let stage = harness.node(&execution.uuid, "stage");
    let package = harness.node(&execution.uuid, "package");
    assert_eq!(stage.status, Status::Succeeded);
    assert_eq!(package.parent_id.as_deref(), Some(stage.uuid.as_str()));
    assert_eq!(harness.execution(&execution.uuid).status, Status::Succeeded);
}
