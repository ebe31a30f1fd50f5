//! Per-agent security policy.

use crate::Permission;
use lattice_types::AgentConfigId;
use serde::{Deserialize, Serialize};

/// The policy applied to a single agent config.
///
/// Policies are plain data; all checking lives in
/// [`SecurityManager`](crate::SecurityManager). An agent with no stored
/// policy is governed by [`SecurityPolicy::default_for`].
///
/// # Example
///
/// ```
/// use lattice_auth::{Permission, SecurityPolicy};
///
/// let policy = SecurityPolicy::default_for("worker-1");
/// assert!(policy.permissions.contains(&Permission::TaskAssign));
/// assert_eq!(policy.max_messages_per_minute, 120);
/// assert!(!policy.allow_cross_gateway);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    /// The agent config this policy governs.
    pub agent_id: AgentConfigId,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
    /// Hosts this agent may reach; enforced by the execution layer, the
    /// core only stores and exports it.
    #[serde(default)]
    pub network_allowlist: Vec<String>,
    /// Concurrent task ceiling used by the scheduler.
    pub max_concurrent_tasks: u32,
    /// Rate-limit window budget.
    pub max_messages_per_minute: u32,
    /// Whether messages from this agent may target other gateways.
    pub allow_cross_gateway: bool,
}

impl SecurityPolicy {
    /// The defaults applied to an agent without an explicit policy.
    #[must_use]
    pub fn default_for(agent_id: impl Into<AgentConfigId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            permissions: vec![
                Permission::TaskAssign,
                Permission::ReportRead,
                Permission::ConfigRead,
            ],
            network_allowlist: Vec::new(),
            max_concurrent_tasks: 8,
            max_messages_per_minute: 120,
            allow_cross_gateway: false,
        }
    }

    /// Returns `true` if this policy grants `perm`.
    #[must_use]
    pub fn grants(&self, perm: Permission) -> bool {
        self.permissions.contains(&perm)
    }
}
