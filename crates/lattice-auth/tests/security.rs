//! Security manager scenarios exercised through the public API.

use lattice_auth::{Permission, SecurityManager, SecurityPolicy};
use lattice_protocol::{Envelope, MeshMessage, MessagePayload};
use lattice_types::{AgentConfigId, AgentIdentity, AgentInstanceId, TaskId};

fn agent(config: &str, gateway: &str) -> AgentIdentity {
    AgentIdentity::new(AgentInstanceId::new(), config, gateway)
}

fn heartbeat() -> MessagePayload {
    MessagePayload::Heartbeat {
        load: 0.3,
        active_tasks: Some(1),
        status_line: None,
    }
}

// ─── Scenario: HMAC tamper detection ───────────────────────────────

#[test]
fn signature_over_heartbeat_rejects_swapped_task_assign() {
    let security = SecurityManager::with_secret([42u8; 32]);
    let envelope = Envelope::broadcast(agent("sensor", "gw"));

    let signature = security.sign_message(&envelope, &heartbeat());
    let mut signed = envelope;
    signed.signature = Some(signature);

    // same envelope, payload swapped for something malicious
    let malicious = MessagePayload::TaskAssign {
        task_id: TaskId::new(),
        task: "malicious".into(),
        priority: 99,
        workflow_step_id: None,
        workflow_plan_id: None,
        deadline: None,
        tags: Vec::new(),
    };

    assert!(security.verify_signature(&signed, &heartbeat()));
    assert!(!security.verify_signature(&signed, &malicious));
}

#[test]
fn managers_sharing_a_secret_verify_each_other() {
    let signer = SecurityManager::with_secret([9u8; 32]);
    let verifier = SecurityManager::with_secret([9u8; 32]);
    let stranger = SecurityManager::with_secret([8u8; 32]);

    let mut envelope = Envelope::broadcast(agent("sensor", "gw"));
    envelope.signature = Some(signer.sign_message(&envelope, &heartbeat()));

    assert!(verifier.verify_signature(&envelope, &heartbeat()));
    assert!(!stranger.verify_signature(&envelope, &heartbeat()));
}

// ─── Scenario: rate limit burst ────────────────────────────────────

#[test]
fn fourth_message_in_window_is_denied_with_one_audit_entry() {
    let mut security = SecurityManager::new();
    let mut policy = SecurityPolicy::default_for("a");
    policy.max_messages_per_minute = 3;
    security.set_policy(policy);

    let a = AgentConfigId::new("a");
    assert!(security.check_rate_limit(&a));
    assert!(security.check_rate_limit(&a));
    assert!(security.check_rate_limit(&a));
    assert!(!security.check_rate_limit(&a));

    let denials: Vec<_> = security
        .agent_audit_log(&a, 50)
        .into_iter()
        .filter(|e| e.action == "rate-limit.exceeded")
        .collect();
    assert_eq!(denials.len(), 1);
    assert!(!denials[0].allowed);
}

// ─── Authorization pipeline ordering ───────────────────────────────

#[test]
fn rate_limit_is_checked_before_permissions() {
    let mut security = SecurityManager::new();
    let mut policy = SecurityPolicy::default_for("a");
    policy.max_messages_per_minute = 1;
    policy.permissions = Vec::new(); // no permissions at all
    security.set_policy(policy);

    let first = MeshMessage::new(Envelope::broadcast(agent("a", "gw")), heartbeat());
    assert!(security.authorize(&first).allowed);

    // second message trips the rate limiter before anything else runs
    let second = MeshMessage::new(
        Envelope::broadcast(agent("a", "gw")),
        MessagePayload::RoleAssign {
            role_id: "coder".into(),
            agent_instance_id: AgentInstanceId::new(),
        },
    );
    let verdict = security.authorize(&second);
    assert!(!verdict.allowed);
    assert_eq!(verdict.reason.as_deref(), Some("rate limit exceeded"));
}

#[test]
fn signed_messages_must_verify_when_signature_present() {
    let mut security = SecurityManager::with_secret([1u8; 32]);

    let mut envelope = Envelope::broadcast(agent("a", "gw"));
    envelope.signature = Some("AAAA".into()); // valid base64, wrong MAC
    let verdict = security.authorize(&MeshMessage::new(envelope, heartbeat()));

    assert!(!verdict.allowed);
    assert_eq!(verdict.reason.as_deref(), Some("invalid signature"));

    // unsigned telemetry still flows
    let unsigned = MeshMessage::new(Envelope::broadcast(agent("a", "gw")), heartbeat());
    assert!(security.authorize(&unsigned).allowed);
}

// ─── Policy round-trip law ─────────────────────────────────────────

#[test]
fn import_of_export_is_identity() {
    let mut security = SecurityManager::new();
    let mut p1 = SecurityPolicy::default_for("alpha");
    p1.permissions.push(Permission::RoleManage);
    let mut p2 = SecurityPolicy::default_for("beta");
    p2.allow_cross_gateway = true;
    security.set_policy(p1);
    security.set_policy(p2);

    let exported = security.export_policies();

    let mut restored = SecurityManager::new();
    restored.import_policies(exported.clone());
    let mut round_tripped = restored.export_policies();

    let mut expected = exported;
    round_tripped.sort_by(|a, b| a.agent_id.as_str().cmp(b.agent_id.as_str()));
    expected.sort_by(|a, b| a.agent_id.as_str().cmp(b.agent_id.as_str()));
    assert_eq!(round_tripped, expected);
}
