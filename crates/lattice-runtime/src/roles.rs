//! Role definitions and quota-checked assignment.
//!
//! A role is a named capability/constraint bundle. At most one role per
//! agent instance; a role with `max_concurrent` set caps how many
//! distinct agents may hold it at once.
//!
//! # Built-in Roles
//!
//! Seeded on construction and restorable with
//! [`RoleManager::reset_builtins`]:
//!
//! | Role | Priority |
//! |------|----------|
//! | `orchestrator` | 100 |
//! | `monitor` | 80 |
//! | `reviewer` | 70 |
//! | `coder` | 60 |
//! | `researcher` | 50 |
//! | `executor` | 40 |

use chrono::{DateTime, Utc};
use lattice_types::{AgentConfigId, AgentIdentity, AgentInstanceId, GatewayId, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ceiling for `max_concurrent`.
const MAX_CONCURRENT_CAP: u32 = 64;

/// A named capability/constraint bundle assignable to agents.
///
/// # Example
///
/// ```
/// use lattice_runtime::Role;
///
/// let role = Role::new("triage", "Triage")
///     .with_priority(65)
///     .with_max_concurrent(2);
/// assert_eq!(role.max_concurrent, Some(2));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub role_id: RoleId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Prepended to the agent's system prompt by the execution layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_fragment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_tools: Vec<String>,
    /// Cap on distinct agents holding this role, in `[1, 64]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<u32>,
    /// Scheduling priority in `[0, 100]`; higher wins ties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

impl Role {
    /// Creates a role with only the required fields.
    #[must_use]
    pub fn new(role_id: impl Into<RoleId>, name: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            name: name.into(),
            description: None,
            system_prompt_fragment: None,
            allowed_tools: Vec::new(),
            denied_tools: Vec::new(),
            max_concurrent: None,
            priority: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the system prompt fragment.
    #[must_use]
    pub fn with_prompt_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.system_prompt_fragment = Some(fragment.into());
        self
    }

    /// Sets the concurrency cap, clamped into `[1, 64]`.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent = Some(max.clamp(1, MAX_CONCURRENT_CAP));
        self
    }

    /// Sets the priority, clamped into `[0, 100]`.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority.min(100));
        self
    }

    /// Sets the allowed tool list.
    #[must_use]
    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    /// Sets the denied tool list.
    #[must_use]
    pub fn with_denied_tools(mut self, tools: Vec<String>) -> Self {
        self.denied_tools = tools;
        self
    }
}

/// A live role grant to one agent instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub agent_instance_id: AgentInstanceId,
    pub agent_config_id: AgentConfigId,
    pub gateway_id: GatewayId,
    /// Snapshot of the role at assignment time; later re-definitions do
    /// not rewrite existing assignments.
    pub role: Role,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: String,
}

/// Checkpoint of the role manager's full state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleState {
    pub roles: Vec<Role>,
    pub assignments: Vec<RoleAssignment>,
}

/// Holds role definitions and per-instance assignments.
///
/// # Example
///
/// ```
/// use lattice_runtime::{Role, RoleManager};
/// use lattice_types::{AgentIdentity, AgentInstanceId};
///
/// let mut roles = RoleManager::new();
/// roles.define_role(Role::new("monitor", "Monitor").with_max_concurrent(1));
///
/// let a1 = AgentIdentity::new(AgentInstanceId::new(), "agent-1", "gw");
/// let a2 = AgentIdentity::new(AgentInstanceId::new(), "agent-2", "gw");
///
/// assert!(roles.assign_role(&a1, &"monitor".into(), "ops").is_some());
/// // quota of 1 is full
/// assert!(roles.assign_role(&a2, &"monitor".into(), "ops").is_none());
/// ```
#[derive(Debug)]
pub struct RoleManager {
    roles: HashMap<RoleId, Role>,
    assignments: HashMap<AgentInstanceId, RoleAssignment>,
}

impl RoleManager {
    /// Creates a manager seeded with the six built-in roles.
    #[must_use]
    pub fn new() -> Self {
        let mut manager = Self {
            roles: HashMap::new(),
            assignments: HashMap::new(),
        };
        manager.reset_builtins();
        manager
    }

    /// Re-seeds the built-in roles, overwriting any redefinitions.
    pub fn reset_builtins(&mut self) {
        for role in builtin_roles() {
            self.roles.insert(role.role_id.clone(), role);
        }
    }

    /// Defines or redefines a role.
    pub fn define_role(&mut self, role: Role) {
        self.roles.insert(role.role_id.clone(), role);
    }

    /// Deletes a role definition. Existing assignments keep their
    /// snapshot; this does not cascade.
    pub fn remove_role(&mut self, role_id: &RoleId) -> bool {
        self.roles.remove(role_id).is_some()
    }

    /// Looks up a role definition.
    #[must_use]
    pub fn role(&self, role_id: &RoleId) -> Option<&Role> {
        self.roles.get(role_id)
    }

    /// Snapshot of all role definitions.
    #[must_use]
    pub fn list_roles(&self) -> Vec<Role> {
        self.roles.values().cloned().collect()
    }

    /// Assigns `role_id` to an agent.
    ///
    /// Returns `None` when the role is unknown, or when its
    /// `max_concurrent` quota is already filled by *other* agents — an
    /// agent re-assigned to the role it holds is not double-counted.
    /// On success any prior assignment for the instance is replaced.
    pub fn assign_role(
        &mut self,
        agent: &AgentIdentity,
        role_id: &RoleId,
        assigned_by: &str,
    ) -> Option<RoleAssignment> {
        let role = self.roles.get(role_id)?.clone();

        if let Some(max) = role.max_concurrent {
            let holders = self
                .assignments
                .values()
                .filter(|a| {
                    &a.role.role_id == role_id && a.agent_instance_id != agent.instance_id
                })
                .count();
            if holders as u32 >= max {
                return None;
            }
        }

        let assignment = RoleAssignment {
            agent_instance_id: agent.instance_id,
            agent_config_id: agent.config_id.clone(),
            gateway_id: agent.gateway_id.clone(),
            role,
            assigned_at: Utc::now(),
            assigned_by: assigned_by.to_string(),
        };
        self.assignments
            .insert(agent.instance_id, assignment.clone());
        Some(assignment)
    }

    /// Removes an instance's assignment; `false` if it had none.
    pub fn unassign_role(&mut self, instance_id: &AgentInstanceId) -> bool {
        self.assignments.remove(instance_id).is_some()
    }

    /// The assignment currently held by an instance.
    #[must_use]
    pub fn assignment(&self, instance_id: &AgentInstanceId) -> Option<&RoleAssignment> {
        self.assignments.get(instance_id)
    }

    /// How many agents currently hold `role_id`.
    #[must_use]
    pub fn count_agents_with_role(&self, role_id: &RoleId) -> usize {
        self.assignments
            .values()
            .filter(|a| &a.role.role_id == role_id)
            .count()
    }

    /// The instances currently holding `role_id`.
    #[must_use]
    pub fn agents_with_role(&self, role_id: &RoleId) -> Vec<AgentInstanceId> {
        self.assignments
            .values()
            .filter(|a| &a.role.role_id == role_id)
            .map(|a| a.agent_instance_id)
            .collect()
    }

    /// Snapshot of every assignment.
    #[must_use]
    pub fn list_assignments(&self) -> Vec<RoleAssignment> {
        self.assignments.values().cloned().collect()
    }

    /// Deep-copied checkpoint of roles and assignments.
    #[must_use]
    pub fn export_state(&self) -> RoleState {
        RoleState {
            roles: self.list_roles(),
            assignments: self.list_assignments(),
        }
    }

    /// Replaces all state with a checkpoint (total replace).
    pub fn import_state(&mut self, state: RoleState) {
        self.roles = state
            .roles
            .into_iter()
            .map(|r| (r.role_id.clone(), r))
            .collect();
        self.assignments = state
            .assignments
            .into_iter()
            .map(|a| (a.agent_instance_id, a))
            .collect();
    }
}

impl Default for RoleManager {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_roles() -> Vec<Role> {
    vec![
        Role::new("orchestrator", "Orchestrator")
            .with_description("Coordinates the other agents on this gateway")
            .with_priority(100),
        Role::new("monitor", "Monitor")
            .with_description("Watches mesh health and raises alerts")
            .with_priority(80),
        Role::new("reviewer", "Reviewer")
            .with_description("Reviews work produced by other agents")
            .with_priority(70),
        Role::new("coder", "Coder")
            .with_description("Implements assigned coding tasks")
            .with_priority(60),
        Role::new("researcher", "Researcher")
            .with_description("Gathers and condenses information")
            .with_priority(50),
        Role::new("executor", "Executor")
            .with_description("Runs commands and mechanical steps")
            .with_priority(40),
    ]
}
