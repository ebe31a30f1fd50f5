//! The fixed permission enumeration.
//!
//! Permissions gate what an agent may ask the orchestrator to do. The
//! set is closed: exactly twelve members, serialized as their dotted
//! wire literals.
//!
//! # Payload Gating
//!
//! [`Permission::required_for`] maps an inbound payload type to the
//! permission it requires. Telemetry payloads (`task.result`,
//! `task.progress`, `heartbeat`) require none — agents must always be
//! able to report back.

use serde::{Deserialize, Serialize};

/// A single grantable permission.
///
/// # Example
///
/// ```
/// use lattice_auth::Permission;
///
/// assert_eq!(Permission::TaskAssign.to_string(), "task.assign");
/// assert_eq!(Permission::required_for("task.assign"), Some(Permission::TaskAssign));
/// assert_eq!(Permission::required_for("heartbeat"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "task.assign")]
    TaskAssign,
    #[serde(rename = "task.cancel")]
    TaskCancel,
    #[serde(rename = "role.assign")]
    RoleAssign,
    #[serde(rename = "role.manage")]
    RoleManage,
    #[serde(rename = "agent.register")]
    AgentRegister,
    #[serde(rename = "agent.unregister")]
    AgentUnregister,
    #[serde(rename = "workflow.create")]
    WorkflowCreate,
    #[serde(rename = "workflow.abort")]
    WorkflowAbort,
    #[serde(rename = "config.read")]
    ConfigRead,
    #[serde(rename = "config.write")]
    ConfigWrite,
    #[serde(rename = "report.read")]
    ReportRead,
    #[serde(rename = "report.export")]
    ReportExport,
}

impl Permission {
    /// Returns the dotted wire literal for this permission.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssign => "task.assign",
            Self::TaskCancel => "task.cancel",
            Self::RoleAssign => "role.assign",
            Self::RoleManage => "role.manage",
            Self::AgentRegister => "agent.register",
            Self::AgentUnregister => "agent.unregister",
            Self::WorkflowCreate => "workflow.create",
            Self::WorkflowAbort => "workflow.abort",
            Self::ConfigRead => "config.read",
            Self::ConfigWrite => "config.write",
            Self::ReportRead => "report.read",
            Self::ReportExport => "report.export",
        }
    }

    /// The permission an inbound payload type requires, if any.
    ///
    /// Telemetry types and unknown types require none.
    #[must_use]
    pub fn required_for(payload_type: &str) -> Option<Self> {
        match payload_type {
            "task.assign" => Some(Self::TaskAssign),
            "role.assign" => Some(Self::RoleAssign),
            "agent.discovery" => Some(Self::AgentRegister),
            _ => None,
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
