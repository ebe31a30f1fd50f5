//! Security layer for the Lattice coordination mesh.
//!
//! Every inbound message passes through the [`SecurityManager`] before
//! the router delivers it. The manager composes four concerns:
//!
//! ```text
//! authorize(message)
//!     │
//!     ├─ 1. rate limit        (per-agent 60 s window)
//!     ├─ 2. cross-gateway     (policy.allow_cross_gateway)
//!     ├─ 3. signature         (HMAC-SHA256, if present must verify)
//!     └─ 4. permission        (payload type → required Permission)
//! ```
//!
//! Denials never raise: [`SecurityManager::authorize`] returns a
//! [`Verdict`] and writes an [`AuditEntry`]; the caller drops the
//! message.
//!
//! # Policy Defaults
//!
//! An agent without an explicit [`SecurityPolicy`] gets the defaults:
//! `task.assign` + `report.read` + `config.read`, 8 concurrent tasks,
//! 120 messages/minute, no cross-gateway access.
//!
//! # Integrity
//!
//! Messages are signed with HMAC-SHA256 over the JSON pair
//! `{messageId, payload}` using a gateway-shared secret, base64-encoded
//! into the envelope. Verification is constant-time. Peer handshakes use
//! Ed25519 challenges whose verification is delegated to a pluggable
//! [`ChallengeVerifier`].

mod audit;
mod manager;
mod permission;
mod policy;
mod rate_limit;

pub use audit::{AuditEntry, AuditLog, AUDIT_LOG_CAPACITY};
pub use manager::{ChallengeVerifier, NullChallengeVerifier, SecurityManager, Verdict};
pub use permission::Permission;
pub use policy::SecurityPolicy;
pub use rate_limit::RateLimiter;
