//! Agent identity value type.

use crate::{AgentConfigId, AgentInstanceId, GatewayId, RoleId};
use serde::{Deserialize, Serialize};

/// Config id reserved for the orchestrator's system identity.
pub const ORCHESTRATOR_CONFIG_ID: &str = "__orchestrator__";

/// The immutable identity tuple of an agent in the mesh.
///
/// Identities are value types: they are cloned into envelopes, indices
/// and audit entries, and never mutated in place — build a replacement
/// instead. The `with_*` helpers consume `self` for exactly that reason.
///
/// # Example
///
/// ```
/// use lattice_types::{AgentIdentity, AgentInstanceId};
///
/// let agent = AgentIdentity::new(AgentInstanceId::new(), "coder-1", "gw-main")
///     .with_role("coder")
///     .with_display_name("Coder One");
///
/// assert_eq!(agent.config_id.as_str(), "coder-1");
/// assert_eq!(agent.role_id.as_ref().map(|r| r.as_str()), Some("coder"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    /// Globally unique id of the live instance.
    pub instance_id: AgentInstanceId,
    /// Declarative id, stable across restarts.
    pub config_id: AgentConfigId,
    /// The gateway hosting this agent.
    pub gateway_id: GatewayId,
    /// Currently assigned role, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<RoleId>,
    /// Human-facing name for dashboards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Advertised capability tags (opaque to the core).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
}

impl AgentIdentity {
    /// Creates an identity with the required fields; optional fields unset.
    #[must_use]
    pub fn new(
        instance_id: AgentInstanceId,
        config_id: impl Into<AgentConfigId>,
        gateway_id: impl Into<GatewayId>,
    ) -> Self {
        Self {
            instance_id,
            config_id: config_id.into(),
            gateway_id: gateway_id.into(),
            role_id: None,
            display_name: None,
            capabilities: None,
        }
    }

    /// Returns a copy of this identity with the role set.
    #[must_use]
    pub fn with_role(mut self, role_id: impl Into<RoleId>) -> Self {
        self.role_id = Some(role_id.into());
        self
    }

    /// Returns a copy of this identity with a display name set.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Returns a copy of this identity with capability tags set.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// The fixed identity used as the `from` of system-originated messages.
    ///
    /// Uses the nil instance id, the reserved [`ORCHESTRATOR_CONFIG_ID`]
    /// config id and the `orchestrator` role.
    #[must_use]
    pub fn orchestrator(gateway_id: impl Into<GatewayId>) -> Self {
        Self::new(AgentInstanceId::nil(), ORCHESTRATOR_CONFIG_ID, gateway_id)
            .with_role("orchestrator")
    }

    /// Returns `true` if this identity belongs to the given gateway.
    #[must_use]
    pub fn is_on_gateway(&self, gateway_id: &GatewayId) -> bool {
        &self.gateway_id == gateway_id
    }
}

impl std::fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.config_id, self.gateway_id)
    }
}
