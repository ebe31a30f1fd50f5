//! Core types for the Lattice coordination mesh.
//!
//! This crate provides the identifier and identity types shared by every
//! other Lattice crate. It sits at the bottom of the dependency graph and
//! carries no runtime logic.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  lattice-types     : ids, AgentIdentity, ErrorCode  ◄── HERE │
//! │  lattice-protocol  : Envelope, MessagePayload, validators    │
//! │  lattice-auth      : Permission, SecurityPolicy, audit       │
//! │  lattice-runtime   : Router, RoleManager, WorkTracker,       │
//! │                      Orchestrator                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Instance vs Config
//!
//! An agent has two identifiers with different lifetimes:
//!
//! - [`AgentInstanceId`] — the live runtime instance; a fresh UUID every
//!   time the agent process starts.
//! - [`AgentConfigId`] — the declarative identifier from configuration;
//!   stable across restarts.
//!
//! Routing targets instances; policies and subscriptions usually filter
//! on configs.
//!
//! # Identity as a Value Type
//!
//! [`AgentIdentity`] is immutable. Components never mutate an identity in
//! place — they construct a replacement. This keeps identities safe to
//! clone into envelopes, indices and audit entries without aliasing
//! concerns.

mod error;
mod id;
mod identity;

pub use error::ErrorCode;
pub use id::{
    AgentConfigId, AgentInstanceId, CorrelationId, GatewayId, MessageId, RoleId, TaskId,
};
pub use identity::{AgentIdentity, ORCHESTRATOR_CONFIG_ID};
