//! The security manager: policy store, integrity, rate limits, audit.

use crate::{AuditEntry, AuditLog, Permission, RateLimiter, SecurityPolicy};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use lattice_protocol::{Envelope, MeshMessage, MessagePayload};
use lattice_types::AgentConfigId;
use rand::RngCore;
use serde_json::json;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Challenge nonce length in bytes (before base64).
const NONCE_LEN: usize = 32;

/// Outcome of [`SecurityManager::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the message may be delivered.
    pub allowed: bool,
    /// Denial reason, absent when allowed.
    pub reason: Option<String>,
}

impl Verdict {
    /// An allowing verdict.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// A denying verdict with a human-readable reason.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Verifies a peer's answer to an Ed25519 challenge.
///
/// Credential issuance and signature checking live outside the core;
/// gateways inject an implementation at construction. The default
/// [`NullChallengeVerifier`] accepts nothing.
pub trait ChallengeVerifier: Send + Sync {
    /// Returns `true` if `response` is a valid answer to the challenge
    /// identified by `nonce`.
    fn verify(&self, nonce: &str, response: &MessagePayload) -> bool;
}

/// Default verifier: rejects every response.
#[derive(Debug, Default)]
pub struct NullChallengeVerifier;

impl ChallengeVerifier for NullChallengeVerifier {
    fn verify(&self, _nonce: &str, _response: &MessagePayload) -> bool {
        false
    }
}

/// Policy store, HMAC integrity, rate limiting and audit in one place.
///
/// All mutation goes through `&mut self`; the orchestrator serializes
/// access behind its own lock (single-writer model). The audit log is
/// internally shared so its trim task can run off-thread.
///
/// # Example
///
/// ```
/// use lattice_auth::{Permission, SecurityManager, SecurityPolicy};
///
/// let mut security = SecurityManager::new();
///
/// // defaults apply until a policy is set
/// assert!(security.has_permission(&"worker".into(), Permission::TaskAssign));
/// assert!(!security.has_permission(&"worker".into(), Permission::RoleManage));
///
/// let mut policy = SecurityPolicy::default_for("worker");
/// policy.permissions.push(Permission::RoleManage);
/// security.set_policy(policy);
/// assert!(security.has_permission(&"worker".into(), Permission::RoleManage));
/// ```
pub struct SecurityManager {
    policies: HashMap<AgentConfigId, SecurityPolicy>,
    secret: [u8; 32],
    rate: RateLimiter,
    audit: AuditLog,
    verifier: Box<dyn ChallengeVerifier>,
}

impl SecurityManager {
    /// Creates a manager with a random 32-byte shared secret.
    #[must_use]
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::with_secret(secret)
    }

    /// Creates a manager with a caller-provided shared secret.
    #[must_use]
    pub fn with_secret(secret: [u8; 32]) -> Self {
        Self {
            policies: HashMap::new(),
            secret,
            rate: RateLimiter::new(),
            audit: AuditLog::new(),
            verifier: Box::new(NullChallengeVerifier),
        }
    }

    /// Replaces the challenge verifier.
    pub fn set_challenge_verifier(&mut self, verifier: Box<dyn ChallengeVerifier>) {
        self.verifier = verifier;
    }

    // ─── Policies ───────────────────────────────────────────────────

    /// Stores (or replaces) the policy for its agent.
    pub fn set_policy(&mut self, policy: SecurityPolicy) {
        self.policies.insert(policy.agent_id.clone(), policy);
    }

    /// Removes a stored policy; the agent falls back to defaults.
    pub fn remove_policy(&mut self, agent_id: &AgentConfigId) -> bool {
        self.policies.remove(agent_id).is_some()
    }

    /// The effective policy for an agent (stored or defaults).
    #[must_use]
    pub fn policy(&self, agent_id: &AgentConfigId) -> SecurityPolicy {
        self.policies
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| SecurityPolicy::default_for(agent_id.clone()))
    }

    /// Deep-copied snapshot of every stored policy.
    #[must_use]
    pub fn export_policies(&self) -> Vec<SecurityPolicy> {
        self.policies.values().cloned().collect()
    }

    /// Replaces the entire policy store.
    pub fn import_policies(&mut self, policies: Vec<SecurityPolicy>) {
        self.policies = policies
            .into_iter()
            .map(|p| (p.agent_id.clone(), p))
            .collect();
    }

    // ─── Checks ─────────────────────────────────────────────────────

    /// Checks a permission and records the decision in the audit log.
    pub fn has_permission(&mut self, agent_id: &AgentConfigId, perm: Permission) -> bool {
        let allowed = self.policy(agent_id).grants(perm);
        self.audit.record(AuditEntry::now(
            agent_id.clone(),
            format!("permission.check:{perm}"),
            json!({}),
            allowed,
        ));
        allowed
    }

    /// Counts one message against the agent's 60-second window.
    ///
    /// A denial writes a `rate-limit.exceeded` audit entry carrying the
    /// observed count and the limit.
    pub fn check_rate_limit(&mut self, agent_id: &AgentConfigId) -> bool {
        let limit = self.policy(agent_id).max_messages_per_minute;
        let allowed = self.rate.check(agent_id, limit);
        if !allowed {
            let count = self.rate.current_count(agent_id).unwrap_or(0);
            self.audit.record(AuditEntry::now(
                agent_id.clone(),
                "rate-limit.exceeded",
                json!({ "count": count, "limit": limit }),
                false,
            ));
        }
        allowed
    }

    /// Drops rate-limit state for an agent (on unregister).
    pub fn forget_agent(&mut self, agent_id: &AgentConfigId) {
        self.rate.forget(agent_id);
    }

    // ─── Integrity ──────────────────────────────────────────────────

    /// Computes the base64 HMAC-SHA256 signature for a message.
    ///
    /// The MAC covers the JSON pair `{messageId, payload}` so that
    /// neither the id nor the payload can be swapped without detection.
    #[must_use]
    pub fn sign_message(&self, envelope: &Envelope, payload: &MessagePayload) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(&Self::signing_bytes(envelope, payload));
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Verifies an envelope's signature against its payload.
    ///
    /// Returns `false` when the signature is absent, not base64, of the
    /// wrong length, or simply wrong. The comparison is constant-time.
    #[must_use]
    pub fn verify_signature(&self, envelope: &Envelope, payload: &MessagePayload) -> bool {
        let Some(signature) = &envelope.signature else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(signature) else {
            return false;
        };

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(&Self::signing_bytes(envelope, payload));
        mac.verify_slice(&decoded).is_ok()
    }

    fn signing_bytes(envelope: &Envelope, payload: &MessagePayload) -> Vec<u8> {
        // Sum-type serialization cannot fail.
        serde_json::to_vec(&json!({
            "messageId": envelope.message_id,
            "payload": payload,
        }))
        .unwrap_or_default()
    }

    // ─── Authorization pipeline ─────────────────────────────────────

    /// Gates an inbound message: rate limit, cross-gateway policy,
    /// signature (when present), then payload permission. Every denial
    /// is audited; the first failure wins.
    pub fn authorize(&mut self, message: &MeshMessage) -> Verdict {
        let from = &message.envelope.from;
        let agent_id = from.config_id.clone();

        if !self.check_rate_limit(&agent_id) {
            debug!(agent = %agent_id, "message denied: rate limit");
            return Verdict::deny("rate limit exceeded");
        }

        if let Some(to) = &message.envelope.to {
            if from.gateway_id != to.gateway_id && !self.policy(&agent_id).allow_cross_gateway {
                self.audit.record(AuditEntry::now(
                    agent_id.clone(),
                    "cross-gateway.denied",
                    json!({
                        "from": from.gateway_id.as_str(),
                        "to": to.gateway_id.as_str(),
                    }),
                    false,
                ));
                debug!(agent = %agent_id, "message denied: cross-gateway");
                return Verdict::deny("cross-gateway access not allowed");
            }
        }

        if message.envelope.signature.is_some()
            && !self.verify_signature(&message.envelope, &message.payload)
        {
            self.audit.record(AuditEntry::now(
                agent_id.clone(),
                "signature.invalid",
                json!({ "messageId": message.envelope.message_id }),
                false,
            ));
            debug!(agent = %agent_id, "message denied: bad signature");
            return Verdict::deny("invalid signature");
        }

        if let Some(required) = Permission::required_for(message.payload.payload_type()) {
            if !self.has_permission(&agent_id, required) {
                debug!(agent = %agent_id, perm = %required, "message denied: permission");
                return Verdict::deny(format!("missing permission {required}"));
            }
        }

        Verdict::allow()
    }

    // ─── Challenges ─────────────────────────────────────────────────

    /// Issues a fresh Ed25519 challenge payload for a peer handshake.
    #[must_use]
    pub fn generate_challenge(&self) -> MessagePayload {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        MessagePayload::SecurityChallenge {
            nonce: STANDARD.encode(nonce),
            algorithm: "ed25519".to_string(),
        }
    }

    /// Delegates response verification to the injected verifier.
    #[must_use]
    pub fn verify_challenge_response(&self, nonce: &str, response: &MessagePayload) -> bool {
        self.verifier.verify(nonce, response)
    }

    // ─── Audit access ───────────────────────────────────────────────

    /// The most recent `limit` audit entries (default call sites use 100).
    #[must_use]
    pub fn audit_log(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit.recent(limit)
    }

    /// The most recent `limit` audit entries for one agent.
    #[must_use]
    pub fn agent_audit_log(&self, agent_id: &AgentConfigId, limit: usize) -> Vec<AuditEntry> {
        self.audit.for_agent(agent_id, limit)
    }
}

impl Default for SecurityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SecurityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityManager")
            .field("policies", &self.policies.len())
            .field("audit_entries", &self.audit.len())
            .finish_non_exhaustive()
    }
}
