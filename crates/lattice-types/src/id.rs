//! Identifier types for Lattice.
//!
//! Message-level identifiers are UUID v4 newtypes; gateway, config and
//! role identifiers are string newtypes whose character sets are enforced
//! by the validators in `lattice-protocol`, not by these constructors.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier for a single envelope on the wire.
///
/// Every envelope gets a fresh `MessageId`; the router's dedup window is
/// keyed on it, so re-routing the same id within the window is a no-op.
///
/// # Example
///
/// ```
/// use lattice_types::MessageId;
///
/// let a = MessageId::new();
/// let b = MessageId::new();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

#[allow(clippy::new_without_default)] // generated per envelope by the router, never defaulted
impl MessageId {
    /// Creates a new `MessageId` with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg:{}", self.0)
    }
}

/// Correlates a request with its responses and follow-up events.
///
/// A correlation id is minted once at the start of an exchange and
/// inherited by every message in that exchange. Per-sender causal order
/// is established through it; wall-clock timestamps are informational
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

#[allow(clippy::new_without_default)] // minted by Envelope construction, never defaulted
impl CorrelationId {
    /// Creates a new `CorrelationId` with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corr:{}", self.0)
    }
}

/// Identifier for a tracked task.
///
/// # Example
///
/// ```
/// use lattice_types::TaskId;
///
/// let id = TaskId::new();
/// println!("created {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Creates a new `TaskId` with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

/// Identifier for a live agent instance.
///
/// A new instance id is generated every time an agent process starts.
/// The nil id is reserved for the orchestrator's own system identity
/// (see [`AgentIdentity::orchestrator`](crate::AgentIdentity::orchestrator)).
///
/// # Example
///
/// ```
/// use lattice_types::AgentInstanceId;
///
/// let live = AgentInstanceId::new();
/// assert!(!live.is_nil());
/// assert!(AgentInstanceId::nil().is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentInstanceId(pub Uuid);

#[allow(clippy::new_without_default)] // an instance id identifies a live process; no sensible default
impl AgentInstanceId {
    /// Creates a new `AgentInstanceId` with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zeros instance id reserved for the orchestrator identity.
    #[must_use]
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns `true` if this is the reserved nil id.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for AgentInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent:{}", self.0)
    }
}

/// Identifier for a gateway in the mesh.
///
/// Gateways are named by their operators; the core treats the name as an
/// opaque string and only compares it for local-vs-remote targeting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GatewayId(pub String);

impl GatewayId {
    /// Creates a gateway id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GatewayId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Declarative agent identifier, stable across restarts.
///
/// Config ids are lowercase tokens (`^[a-z0-9][a-z0-9_-]{0,127}$`);
/// enforcement lives in `lattice-protocol`'s validators so that ids read
/// from the wire and ids built in-process go through the same check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentConfigId(pub String);

impl AgentConfigId {
    /// Creates a config id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentConfigId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for a role definition.
///
/// Role ids match `^[a-z][a-z0-9_-]{0,63}$`; see `lattice-protocol` for
/// the validator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleId(pub String);

impl RoleId {
    /// Creates a role id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn nil_instance_id() {
        let nil = AgentInstanceId::nil();
        assert!(nil.is_nil());
        assert!(!AgentInstanceId::new().is_nil());
        assert_eq!(nil.uuid(), Uuid::nil());
    }

    #[test]
    fn display_prefixes() {
        let msg = MessageId::new();
        let task = TaskId::new();
        assert!(msg.to_string().starts_with("msg:"));
        assert!(task.to_string().starts_with("task:"));
    }

    #[test]
    fn string_ids_round_trip_serde() {
        let gw = GatewayId::new("gw-main");
        let json = serde_json::to_string(&gw).expect("serialize");
        assert_eq!(json, "\"gw-main\"");
        let back: GatewayId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, gw);
    }

    #[test]
    fn uuid_ids_serialize_as_plain_uuid() {
        let id = MessageId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{}\"", id.uuid()));
    }
}
