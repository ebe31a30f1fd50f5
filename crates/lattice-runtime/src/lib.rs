//! Lattice runtime — the coordination core.
//!
//! This crate composes the four sub-managers into the
//! [`Orchestrator`]: the public entry point a gateway embeds.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Orchestrator                             │
//! │   submit_task / register_agent / assign_role / start / stop  │
//! │  ┌──────────┐ ┌─────────────┐ ┌─────────────┐ ┌───────────┐  │
//! │  │  Router  │ │ RoleManager │ │ WorkTracker │ │ Security  │  │
//! │  │          │ │             │ │             │ │ Manager   │  │
//! │  │ dedup    │ │ builtins    │ │ state       │ │ (lattice- │  │
//! │  │ TTL/hop  │ │ quotas      │ │ machine     │ │  auth)    │  │
//! │  │ peers    │ │ export      │ │ indices     │ │           │  │
//! │  └──────────┘ └─────────────┘ └─────────────┘ └───────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!          │ PeerTransport (injected)          │ OrchestratorEvent
//!          ▼                                   ▼
//!     peer gateways                       event listeners
//! ```
//!
//! # Concurrency Model
//!
//! The core is **single-writer**: each sub-manager sits behind its own
//! `parking_lot::Mutex` owned by the orchestrator, and no call path
//! holds two manager locks at once except router → domain (handlers run
//! under the router lock and may take one domain lock). The injected
//! [`PeerTransport`](router::PeerTransport) hook must not block; async
//! transports spawn their own tasks.
//!
//! # Modules
//!
//! - [`router`] — subscription dispatch, dedup window, TTL/hop guards,
//!   peer forwarding.
//! - [`roles`] — role definitions, quota-checked assignment,
//!   checkpointing.
//! - [`work`] — task state machine, indices, summaries, cleanup.
//! - [`orchestrator`] — composition, agent selection, built-in
//!   handlers, lifecycle timers.
//! - [`config`] — tunables for the above.

pub mod config;
pub mod events;
pub mod orchestrator;
pub mod roles;
pub mod router;
pub mod work;

pub use config::CoreConfig;
pub use events::{EventListener, OrchestratorEvent};
pub use orchestrator::{HeartbeatRecord, Orchestrator, SubmitTask};
pub use roles::{Role, RoleAssignment, RoleManager, RoleState};
pub use router::{
    MessageHandler, NullTransport, PeerGateway, PeerStatus, PeerTransport, Router, SendOptions,
    SubscriptionFilter, SubscriptionId,
};
pub use work::{
    AgentWorkload, NewTask, TaskFilter, TaskStatus, TrackedTask, WorkReport, WorkSummary,
    WorkTracker,
};
