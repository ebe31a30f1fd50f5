//! Wire protocol for the Lattice coordination mesh.
//!
//! Defines the transport-neutral [`Envelope`] header, the typed
//! [`MessagePayload`] sum, and the input validators applied at the
//! boundary before anything reaches the router.
//!
//! # Message Shape
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ MeshMessage                                  │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ Envelope                               │  │
//! │  │  messageId / correlationId / timestamp │  │
//! │  │  from / to? / direction                │  │
//! │  │  signature? / ttlSeconds? / hopCount?  │  │
//! │  └────────────────────────────────────────┘  │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ MessagePayload  (tagged on "type")     │  │
//! │  │  task.assign | task.result | ...       │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Validation Layers
//!
//! Two layers with different bounds, both in this crate:
//!
//! - [`MessagePayload::validate`] — protocol bounds (task text up to
//!   64 KiB, results up to 256 KiB) applied to every routed payload.
//! - [`validate`] — the stricter outer-surface validators (identifier
//!   patterns, 16 KiB task descriptions, gateway URLs, sanitization)
//!   applied to caller-supplied input before a payload is even built.
//!
//! # Wire Form
//!
//! JSON, camelCase field names, protocol version literal `"1.0"`.
//! Signatures are base64; signing itself lives in `lattice-auth`.

mod envelope;
mod payload;
pub mod validate;

pub use envelope::{
    Direction, Envelope, MAX_HOP_COUNT, MAX_TTL_SECONDS, MIN_TTL_SECONDS, PROTOCOL_VERSION,
};
pub use payload::{
    DiscoveryAction, MeshMessage, MessagePayload, PayloadError, TaskResultStatus,
    MAX_RESULT_LEN, MAX_STATUS_LINE_LEN, MAX_TASK_LEN,
};
pub use validate::{ValidationError, MAX_DESCRIPTION_LEN, MAX_PAYLOAD_BYTES};
