//! End-to-end coordination scenarios.
//!
//! Exercises the public orchestrator surface the way a gateway would:
//! register agents, assign roles, submit tasks, feed agent telemetry
//! back through the inbound gate, and observe events.

use lattice_protocol::{Envelope, MeshMessage, MessagePayload, TaskResultStatus};
use lattice_runtime::{
    CoreConfig, Orchestrator, OrchestratorEvent, Role, SubmitTask, TaskStatus,
};
use lattice_types::{AgentIdentity, AgentInstanceId};
use parking_lot::Mutex;
use std::sync::Arc;

fn orchestrator() -> Orchestrator {
    Orchestrator::new(CoreConfig::new("gw-main"))
}

fn register(core: &Orchestrator, config: &str) -> AgentIdentity {
    let agent = AgentIdentity::new(AgentInstanceId::new(), config, "gw-main");
    core.register_agent(agent.clone()).expect("valid config id");
    agent
}

fn collect_events(core: &Orchestrator) -> Arc<Mutex<Vec<OrchestratorEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    core.on_event(Arc::new(move |event| sink.lock().push(event.clone())));
    events
}

/// Agent telemetry arrives through the security gate, like a real
/// gateway delivers it.
fn deliver(core: &Orchestrator, from: &AgentIdentity, payload: MessagePayload) {
    let verdict = core.deliver_inbound(MeshMessage::new(Envelope::broadcast(from.clone()), payload));
    assert!(verdict.allowed, "telemetry unexpectedly denied");
}

// ─── Scenario: quota enforcement ───────────────────────────────────

#[test]
fn monitor_quota_blocks_second_agent_until_unassigned() {
    let core = orchestrator();
    core.define_role(Role::new("monitor", "Monitor").with_max_concurrent(1));

    let a1 = register(&core, "agent-1");
    let a2 = register(&core, "agent-2");

    assert!(core.assign_role(&a1.instance_id, &"monitor".into(), "ops").is_some());
    assert!(core.assign_role(&a2.instance_id, &"monitor".into(), "ops").is_none());

    assert!(core.unassign_role(&a1.instance_id));
    assert!(core.assign_role(&a2.instance_id, &"monitor".into(), "ops").is_some());
}

// ─── Scenario: full task lifecycle ─────────────────────────────────

#[test]
fn submitted_task_runs_to_completion_through_telemetry() {
    let core = orchestrator();
    let events = collect_events(&core);

    let coder = register(&core, "coder-1");
    core.assign_role(&coder.instance_id, &"coder".into(), "ops")
        .expect("coder role exists");

    let task = core
        .submit_task(
            SubmitTask::named("impl X")
                .with_target_role("coder")
                .with_workflow(Some("step-1"), Some("plan-1")),
        )
        .expect("valid submission");

    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.assigned_to, Some(coder.instance_id));

    deliver(
        &core,
        &coder,
        MessagePayload::TaskProgress {
            percent: Some(50),
            status_line: Some("halfway".into()),
            workflow_step_id: Some("step-1".into()),
        },
    );
    assert_eq!(
        core.task(&task.task_id).expect("tracked").progress_percent,
        Some(50)
    );

    deliver(
        &core,
        &coder,
        MessagePayload::TaskResult {
            status: TaskResultStatus::Success,
            result: Some("shipped".into()),
            workflow_step_id: Some("step-1".into()),
            duration_ms: Some(1_500),
        },
    );

    let finished = core.task(&task.task_id).expect("tracked");
    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(finished.progress_percent, Some(100));

    let seen = events.lock();
    assert!(seen.iter().any(|e| matches!(
        e,
        OrchestratorEvent::TaskCompleted { task_id, status: TaskStatus::Completed, .. }
            if *task_id == task.task_id
    )));
}

// ─── Scenario: retry respects the budget ───────────────────────────

#[test]
fn exhausted_retry_budget_refuses_retry() {
    let core = orchestrator();
    let worker = register(&core, "worker");

    let task = core
        .submit_task(
            SubmitTask::named("one shot")
                .with_target_agent(worker.instance_id)
                .with_workflow(Some("step-r"), None::<String>)
                .with_max_retries(0),
        )
        .expect("valid submission");

    deliver(
        &core,
        &worker,
        MessagePayload::TaskResult {
            status: TaskResultStatus::Failure,
            result: None,
            workflow_step_id: Some("step-r".into()),
            duration_ms: None,
        },
    );

    assert_eq!(core.task(&task.task_id).expect("tracked").status, TaskStatus::Failed);
    assert!(!core.retry_task(&task.task_id));
}

#[test]
fn retry_within_budget_requeues_and_counts() {
    let core = orchestrator();
    let worker = register(&core, "worker");

    let task = core
        .submit_task(
            SubmitTask::named("flaky")
                .with_target_agent(worker.instance_id)
                .with_workflow(Some("step-f"), None::<String>),
        )
        .expect("valid submission");

    deliver(
        &core,
        &worker,
        MessagePayload::TaskResult {
            status: TaskResultStatus::Timeout,
            result: None,
            workflow_step_id: Some("step-f".into()),
            duration_ms: None,
        },
    );

    assert!(core.retry_task(&task.task_id));
    let retried = core.task(&task.task_id).expect("tracked");
    assert_eq!(retried.status, TaskStatus::Pending);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.assigned_to.is_none());
}

// ─── Scenario: cancelled tasks ignore late telemetry ───────────────

#[test]
fn cancelled_task_ignores_late_updates() {
    let core = orchestrator();
    let worker = register(&core, "worker");

    let task = core
        .submit_task(
            SubmitTask::named("doomed")
                .with_target_agent(worker.instance_id)
                .with_workflow(Some("step-c"), None::<String>),
        )
        .expect("valid submission");

    assert!(core.cancel_task(&task.task_id));

    deliver(
        &core,
        &worker,
        MessagePayload::TaskProgress {
            percent: Some(90),
            status_line: None,
            workflow_step_id: Some("step-c".into()),
        },
    );
    deliver(
        &core,
        &worker,
        MessagePayload::TaskResult {
            status: TaskResultStatus::Success,
            result: None,
            workflow_step_id: Some("step-c".into()),
            duration_ms: None,
        },
    );

    let after = core.task(&task.task_id).expect("tracked");
    assert_eq!(after.status, TaskStatus::Cancelled);
    assert!(after.progress_percent.is_none());
}

// ─── Scenario: dedup across the inbound gate ───────────────────────

#[test]
fn replayed_heartbeat_is_counted_once() {
    let core = orchestrator();
    let sensor = register(&core, "sensor");

    let message = MeshMessage::new(
        Envelope::broadcast(sensor.clone()),
        MessagePayload::Heartbeat {
            load: 0.7,
            active_tasks: None,
            status_line: None,
        },
    );

    assert!(core.deliver_inbound(message.clone()).allowed);
    let first = core.heartbeat(&sensor.instance_id).expect("recorded");

    // a peer echoes the same envelope back; dedup swallows it
    assert!(core.deliver_inbound(message).allowed);
    let second = core.heartbeat(&sensor.instance_id).expect("recorded");
    assert_eq!(first.received_at, second.received_at);
}

// ─── Scenario: summary over a mixed population ─────────────────────

#[test]
fn summary_reflects_population_and_workloads() {
    let core = orchestrator();
    let worker = register(&core, "worker");

    let _done = core
        .submit_task(
            SubmitTask::named("done")
                .with_target_agent(worker.instance_id)
                .with_workflow(Some("step-d"), None::<String>),
        )
        .expect("submit");
    deliver(
        &core,
        &worker,
        MessagePayload::TaskResult {
            status: TaskResultStatus::Success,
            result: None,
            workflow_step_id: Some("step-d".into()),
            duration_ms: None,
        },
    );

    core.submit_task(SubmitTask::named("queued").with_target_role("reviewer"))
        .expect("submit");

    let summary = core.summary();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.pending, 1);

    let report = core.report(None, None);
    assert_eq!(report.tasks.len(), 2);
    assert_eq!(report.workloads.len(), 1);
    assert_eq!(report.workloads[0].agent_instance_id, worker.instance_id);
    assert_eq!(report.workloads[0].completed_tasks, 1);
}

// ─── Round-trip laws ───────────────────────────────────────────────

#[test]
fn role_state_survives_orchestrator_restart() {
    let core = orchestrator();
    core.define_role(Role::new("triage", "Triage").with_max_concurrent(2));
    let a1 = register(&core, "a1");
    core.assign_role(&a1.instance_id, &"triage".into(), "ops")
        .expect("assign");

    let checkpoint = core.export_roles();

    let replacement = orchestrator();
    replacement.import_roles(checkpoint);

    let assignments = replacement.list_assignments();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].agent_instance_id, a1.instance_id);
    assert_eq!(assignments[0].role.role_id, "triage".into());

    // quota state carried over: one more slot on triage
    let a2 = register(&replacement, "a2");
    assert!(replacement
        .assign_role(&a2.instance_id, &"triage".into(), "ops")
        .is_some());
    let a3 = register(&replacement, "a3");
    assert!(replacement
        .assign_role(&a3.instance_id, &"triage".into(), "ops")
        .is_none());
}

#[test]
fn policy_snapshot_survives_orchestrator_restart() {
    let core = orchestrator();
    let mut policy = lattice_auth::SecurityPolicy::default_for("worker");
    policy.allow_cross_gateway = true;
    policy.max_messages_per_minute = 9;
    core.set_policy(policy.clone());

    let snapshot = core.export_policies();
    let replacement = orchestrator();
    replacement.import_policies(snapshot);

    assert_eq!(replacement.policy(&"worker".into()), policy);
}
