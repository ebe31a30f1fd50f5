//! Typed payload variants.
//!
//! [`MessagePayload`] is the tagged sum routed inside every envelope.
//! The `type` field on the wire is the literal discriminator the router
//! and the permission map key on.
//!
//! | Tag | Variant | Carried by |
//! |-----|---------|------------|
//! | `task.assign` | [`TaskAssign`](MessagePayload::TaskAssign) | orchestrator → agent |
//! | `task.result` | [`TaskResult`](MessagePayload::TaskResult) | agent → orchestrator |
//! | `task.progress` | [`TaskProgress`](MessagePayload::TaskProgress) | agent → orchestrator |
//! | `heartbeat` | [`Heartbeat`](MessagePayload::Heartbeat) | agent → mesh |
//! | `agent.discovery` | [`AgentDiscovery`](MessagePayload::AgentDiscovery) | gateway → mesh |
//! | `role.assign` | [`RoleAssign`](MessagePayload::RoleAssign) | orchestrator → mesh |
//! | `security.challenge` | [`SecurityChallenge`](MessagePayload::SecurityChallenge) | gateway → peer |
//! | `security.response` | [`SecurityResponse`](MessagePayload::SecurityResponse) | peer → gateway |

use crate::envelope::Envelope;
use chrono::{DateTime, Utc};
use lattice_types::{AgentIdentity, AgentInstanceId, ErrorCode, RoleId, TaskId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol bound on task text in a `task.assign` payload.
pub const MAX_TASK_LEN: usize = 65_536;

/// Protocol bound on result text in a `task.result` payload.
pub const MAX_RESULT_LEN: usize = 262_144;

/// Protocol bound on a one-line status string.
pub const MAX_STATUS_LINE_LEN: usize = 1_024;

/// Outcome reported by an agent in a `task.result` payload.
///
/// Mapped onto task status by the work tracker: `Success` and `Partial`
/// complete the task, `Timeout` times it out, `Failure` fails it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResultStatus {
    Success,
    Partial,
    Failure,
    Timeout,
}

/// What an `agent.discovery` payload announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryAction {
    /// Agent came online.
    Join,
    /// Agent is going away.
    Leave,
    /// Periodic presence announcement.
    Announce,
}

/// The typed payload routed inside an envelope.
///
/// # Example
///
/// ```
/// use lattice_protocol::MessagePayload;
///
/// let hb = MessagePayload::Heartbeat {
///     load: 0.25,
///     active_tasks: Some(2),
///     status_line: None,
/// };
/// assert_eq!(hb.payload_type(), "heartbeat");
/// assert!(hb.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessagePayload {
    /// Hand a task to an agent.
    #[serde(rename = "task.assign", rename_all = "camelCase")]
    TaskAssign {
        task_id: TaskId,
        task: String,
        priority: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_step_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_plan_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deadline: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
    },

    /// Report the final outcome of a task.
    #[serde(rename = "task.result", rename_all = "camelCase")]
    TaskResult {
        status: TaskResultStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_step_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },

    /// Report intermediate progress on a task.
    #[serde(rename = "task.progress", rename_all = "camelCase")]
    TaskProgress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        percent: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_line: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_step_id: Option<String>,
    },

    /// Periodic liveness + load report. `load` feeds agent selection.
    #[serde(rename = "heartbeat", rename_all = "camelCase")]
    Heartbeat {
        load: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_tasks: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_line: Option<String>,
    },

    /// Presence announcement for an agent joining or leaving the mesh.
    #[serde(rename = "agent.discovery", rename_all = "camelCase")]
    AgentDiscovery {
        action: DiscoveryAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<AgentIdentity>,
    },

    /// Announce a role assignment to the mesh.
    #[serde(rename = "role.assign", rename_all = "camelCase")]
    RoleAssign {
        role_id: RoleId,
        agent_instance_id: AgentInstanceId,
    },

    /// Challenge issued to a peer during the handshake.
    #[serde(rename = "security.challenge", rename_all = "camelCase")]
    SecurityChallenge { nonce: String, algorithm: String },

    /// Peer's answer to a challenge. Signature verification is delegated
    /// to a pluggable verifier in `lattice-auth`.
    #[serde(rename = "security.response", rename_all = "camelCase")]
    SecurityResponse {
        nonce: String,
        signature: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_key: Option<String>,
    },
}

impl MessagePayload {
    /// Returns the wire discriminator for this payload.
    #[must_use]
    pub fn payload_type(&self) -> &'static str {
        match self {
            Self::TaskAssign { .. } => "task.assign",
            Self::TaskResult { .. } => "task.result",
            Self::TaskProgress { .. } => "task.progress",
            Self::Heartbeat { .. } => "heartbeat",
            Self::AgentDiscovery { .. } => "agent.discovery",
            Self::RoleAssign { .. } => "role.assign",
            Self::SecurityChallenge { .. } => "security.challenge",
            Self::SecurityResponse { .. } => "security.response",
        }
    }

    /// Checks the protocol bounds for this payload.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] naming the first violated bound.
    pub fn validate(&self) -> Result<(), PayloadError> {
        match self {
            Self::TaskAssign { task, priority, .. } => {
                if task.len() > MAX_TASK_LEN {
                    return Err(PayloadError::TaskTooLong { len: task.len() });
                }
                if *priority > 100 {
                    return Err(PayloadError::PriorityOutOfRange(*priority));
                }
            }
            Self::TaskResult { result, .. } => {
                if let Some(text) = result {
                    if text.len() > MAX_RESULT_LEN {
                        return Err(PayloadError::ResultTooLong { len: text.len() });
                    }
                }
            }
            Self::TaskProgress {
                percent,
                status_line,
                ..
            } => {
                if let Some(p) = percent {
                    if *p > 100 {
                        return Err(PayloadError::PercentOutOfRange(*p));
                    }
                }
                if let Some(line) = status_line {
                    if line.len() > MAX_STATUS_LINE_LEN {
                        return Err(PayloadError::StatusLineTooLong { len: line.len() });
                    }
                }
            }
            Self::Heartbeat {
                load, status_line, ..
            } => {
                if !(0.0..=1.0).contains(load) {
                    return Err(PayloadError::LoadOutOfRange(*load));
                }
                if let Some(line) = status_line {
                    if line.len() > MAX_STATUS_LINE_LEN {
                        return Err(PayloadError::StatusLineTooLong { len: line.len() });
                    }
                }
            }
            Self::AgentDiscovery { .. }
            | Self::RoleAssign { .. }
            | Self::SecurityChallenge { .. }
            | Self::SecurityResponse { .. } => {}
        }
        Ok(())
    }
}

/// A protocol bound was violated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    #[error("task text is {len} chars, protocol limit is {MAX_TASK_LEN}")]
    TaskTooLong { len: usize },

    #[error("result text is {len} chars, protocol limit is {MAX_RESULT_LEN}")]
    ResultTooLong { len: usize },

    #[error("status line is {len} chars, limit is {MAX_STATUS_LINE_LEN}")]
    StatusLineTooLong { len: usize },

    #[error("load {0} is outside [0.0, 1.0]")]
    LoadOutOfRange(f32),

    #[error("percent {0} is outside [0, 100]")]
    PercentOutOfRange(u8),

    #[error("priority {0} is outside [0, 100]")]
    PriorityOutOfRange(u8),
}

impl ErrorCode for PayloadError {
    fn code(&self) -> &'static str {
        match self {
            Self::TaskTooLong { .. } => "PROTO_TASK_TOO_LONG",
            Self::ResultTooLong { .. } => "PROTO_RESULT_TOO_LONG",
            Self::StatusLineTooLong { .. } => "PROTO_STATUS_LINE_TOO_LONG",
            Self::LoadOutOfRange(_) => "PROTO_LOAD_OUT_OF_RANGE",
            Self::PercentOutOfRange(_) => "PROTO_PERCENT_OUT_OF_RANGE",
            Self::PriorityOutOfRange(_) => "PROTO_PRIORITY_OUT_OF_RANGE",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// The routed unit: envelope plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshMessage {
    pub envelope: Envelope,
    pub payload: MessagePayload,
}

impl MeshMessage {
    /// Pairs an envelope with its payload.
    #[must_use]
    pub fn new(envelope: Envelope, payload: MessagePayload) -> Self {
        Self { envelope, payload }
    }
}
