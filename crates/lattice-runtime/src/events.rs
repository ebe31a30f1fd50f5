//! Events emitted by the orchestrator.
//!
//! Explicit listener lists, no inheritance: gateways register callbacks
//! with [`Orchestrator::on_event`](crate::Orchestrator::on_event) and
//! receive every event. Listeners run synchronously on the dispatch
//! path and must not re-enter the orchestrator; anything heavier spawns
//! its own task.

use crate::work::TaskStatus;
use lattice_types::{AgentIdentity, TaskId};
use std::sync::Arc;

/// A notification from the coordination core.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    /// A tracked task reached `completed`, `failed` or `timeout`
    /// through an incoming `task.result`.
    TaskCompleted {
        task_id: TaskId,
        status: TaskStatus,
        result: Option<String>,
    },
    /// A tracked task received a `task.progress` update.
    TaskProgress {
        task_id: TaskId,
        percent: Option<u8>,
        status_line: Option<String>,
    },
    /// A non-local agent announced itself to the mesh.
    AgentJoined { agent: AgentIdentity },
    /// A non-local agent announced its departure.
    AgentLeft { agent: AgentIdentity },
}

/// Callback registered with the orchestrator.
pub type EventListener = Arc<dyn Fn(&OrchestratorEvent) + Send + Sync>;
