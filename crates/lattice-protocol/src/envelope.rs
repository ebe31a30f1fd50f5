//! The transport-neutral envelope header.
//!
//! An [`Envelope`] wraps every payload routed through the mesh. It names
//! the sender and (optionally) the target, carries the dedup and
//! correlation ids, and holds the forwarding guards (TTL, hop count).
//!
//! # Targeting
//!
//! | `to` | `direction` | Delivery |
//! |------|-------------|----------|
//! | absent | `broadcast` | all local subscribers + all connected peers |
//! | present, local gateway | `request` | local subscribers only |
//! | present, remote gateway | `request` | the one matching peer |

use chrono::{DateTime, Utc};
use lattice_types::{AgentIdentity, CorrelationId, MessageId};
use serde::{Deserialize, Serialize};

/// Wire protocol version literal.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Hard cap on hop count; a message at or above this is never forwarded.
pub const MAX_HOP_COUNT: u8 = 16;

/// Minimum accepted TTL.
pub const MIN_TTL_SECONDS: u32 = 1;

/// Maximum accepted TTL (24 hours).
pub const MAX_TTL_SECONDS: u32 = 86_400;

/// Direction of an envelope relative to its exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Addressed to a specific agent, expecting a response.
    Request,
    /// A reply correlated to an earlier request.
    Response,
    /// Fan-out to every subscriber and connected peer.
    Broadcast,
    /// One-way notification addressed to a specific agent.
    Event,
}

/// The header wrapped around every routed payload.
///
/// Envelopes are constructed through [`Envelope::request`] and
/// [`Envelope::broadcast`]; both mint a fresh `message_id` and a fresh
/// `correlation_id` unless one is inherited with
/// [`with_correlation`](Self::with_correlation).
///
/// # Example
///
/// ```
/// use lattice_protocol::{Direction, Envelope};
/// use lattice_types::{AgentIdentity, AgentInstanceId};
///
/// let from = AgentIdentity::new(AgentInstanceId::new(), "sensor", "gw-a");
/// let env = Envelope::broadcast(from).with_ttl(30);
///
/// assert_eq!(env.direction, Direction::Broadcast);
/// assert_eq!(env.ttl_seconds, Some(30));
/// assert!(env.to.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique per envelope; the dedup key.
    pub message_id: MessageId,
    /// Shared across an exchange; establishes per-sender causal order.
    pub correlation_id: CorrelationId,
    /// Creation time at the sender.
    pub timestamp: DateTime<Utc>,
    /// The sending agent.
    pub from: AgentIdentity,
    /// The target agent; absent for broadcasts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<AgentIdentity>,
    /// Request, response, broadcast or event.
    pub direction: Direction,
    /// Always [`PROTOCOL_VERSION`] for envelopes built by this crate.
    pub protocol_version: String,
    /// Base64 HMAC signature, if the sender signed the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Drop the message once it is older than this many seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u32>,
    /// Gateway hops taken so far; incremented on each forward.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_count: Option<u8>,
}

impl Envelope {
    fn base(from: AgentIdentity, to: Option<AgentIdentity>, direction: Direction) -> Self {
        Self {
            message_id: MessageId::new(),
            correlation_id: CorrelationId::new(),
            timestamp: Utc::now(),
            from,
            to,
            direction,
            protocol_version: PROTOCOL_VERSION.to_string(),
            signature: None,
            ttl_seconds: None,
            hop_count: None,
        }
    }

    /// Creates a request envelope addressed to a specific agent.
    #[must_use]
    pub fn request(from: AgentIdentity, to: AgentIdentity) -> Self {
        Self::base(from, Some(to), Direction::Request)
    }

    /// Creates a broadcast envelope with no target.
    #[must_use]
    pub fn broadcast(from: AgentIdentity) -> Self {
        Self::base(from, None, Direction::Broadcast)
    }

    /// Inherits a correlation id from an earlier message in the exchange.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Overrides the direction (e.g. `Response` for replies).
    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Sets the TTL, clamped into `[MIN_TTL_SECONDS, MAX_TTL_SECONDS]`.
    #[must_use]
    pub fn with_ttl(mut self, ttl_seconds: u32) -> Self {
        self.ttl_seconds = Some(ttl_seconds.clamp(MIN_TTL_SECONDS, MAX_TTL_SECONDS));
        self
    }

    /// Sets the hop count (normally only done when re-ingesting a
    /// peer-received envelope in tests).
    #[must_use]
    pub fn with_hop_count(mut self, hop_count: u8) -> Self {
        self.hop_count = Some(hop_count);
        self
    }

    /// Age of the envelope at `now`, in whole seconds (0 for future
    /// timestamps from clock-skewed senders).
    #[must_use]
    pub fn age_seconds(&self, now: DateTime<Utc>) -> u64 {
        (now - self.timestamp).num_seconds().max(0) as u64
    }

    /// Returns `true` if a TTL is set and has lapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_seconds {
            Some(ttl) => self.age_seconds(now) > u64::from(ttl),
            None => false,
        }
    }

    /// Returns `true` if the hop budget is spent and the message must
    /// not be forwarded further.
    #[must_use]
    pub fn hop_exhausted(&self) -> bool {
        self.hop_count.unwrap_or(0) >= MAX_HOP_COUNT
    }

    /// Clone of this envelope with the hop count incremented, as handed
    /// to peers on forwarding. Saturates at `u8::MAX`.
    #[must_use]
    pub fn next_hop(&self) -> Self {
        let mut forwarded = self.clone();
        forwarded.hop_count = Some(self.hop_count.unwrap_or(0).saturating_add(1));
        forwarded
    }
}
