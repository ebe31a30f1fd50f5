//! Message router — local dispatch and peer forwarding.
//!
//! The router delivers every [`MeshMessage`] to interested local
//! subscribers and forwards it to connected peer gateways. All routing
//! decisions happen here:
//!
//! ```text
//! route(message)
//!     │
//!     ├─ 1. dedup        seen messageId? drop silently
//!     ├─ 2. TTL          older than ttlSeconds? drop
//!     ├─ 3. hop cap      hopCount ≥ 16? drop
//!     ├─ 4. local        to absent, or to.gatewayId == ours
//!     │       └─ dispatch to matching subscriptions
//!     └─ 5. remote       to on another gateway, or broadcast
//!             └─ clone, hopCount+1, hand to PeerTransport
//! ```
//!
//! # Failure Semantics
//!
//! Routing never fails from the caller's perspective: invalid messages
//! are dropped with a debug log, handler errors are logged at warn and
//! never reach other handlers, and transport failures belong to the
//! transport.
//!
//! # Dedup Window
//!
//! Message ids are remembered in insertion order, bounded at
//! [`DEDUP_CAPACITY`]. On overflow the oldest 20% are evicted (FIFO),
//! so a burst of fresh traffic cannot wedge the window.

use lattice_protocol::{Direction, Envelope, MeshMessage, MessagePayload};
use lattice_types::{
    AgentConfigId, AgentIdentity, AgentInstanceId, CorrelationId, GatewayId, MessageId, RoleId,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Maximum remembered message ids.
pub const DEDUP_CAPACITY: usize = 10_000;

/// Fraction of the window evicted on overflow, as a divisor (5 ⇒ 20%).
const DEDUP_EVICT_DIVISOR: usize = 5;

/// Error type surfaced by subscription handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscription callback.
///
/// Handlers run synchronously under the router lock and must not call
/// back into the router; async work is spawned by the handler itself.
/// A returned error is logged and contained — it never blocks delivery
/// to other subscribers.
pub type MessageHandler = Arc<dyn Fn(&MeshMessage) -> Result<(), HandlerError> + Send + Sync>;

/// Connection state of a peer gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Connected,
    Connecting,
    Disconnected,
}

/// A peer gateway in the mesh.
#[derive(Debug, Clone)]
pub struct PeerGateway {
    pub gateway_id: GatewayId,
    /// Transport endpoint, if known (validated by `lattice-protocol`).
    pub url: Option<String>,
    pub status: PeerStatus,
}

impl PeerGateway {
    /// Creates a peer in the `Connecting` state.
    #[must_use]
    pub fn new(gateway_id: impl Into<GatewayId>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            url: None,
            status: PeerStatus::Connecting,
        }
    }

    /// Sets the endpoint URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the connection status.
    #[must_use]
    pub fn with_status(mut self, status: PeerStatus) -> Self {
        self.status = status;
        self
    }
}

/// The hook a transport implementation fulfills.
///
/// Called once per (peer, message) on the forwarding path, outside any
/// await point. Implementations must not block; an async transport
/// enqueues or spawns. Delivery is fire-and-forget — the core performs
/// no ack tracking or retry (the dedup window makes transport-level
/// redelivery safe).
pub trait PeerTransport: Send + Sync {
    /// Ships `message` toward `peer`.
    fn send_to_peer(&self, peer: &PeerGateway, message: &MeshMessage);
}

/// Default transport: drops everything (single-gateway deployments).
#[derive(Debug, Default)]
pub struct NullTransport;

impl PeerTransport for NullTransport {
    fn send_to_peer(&self, _peer: &PeerGateway, _message: &MeshMessage) {}
}

/// Filter applied to a subscription; omitted fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    /// Match only this payload discriminator (e.g. `"heartbeat"`).
    pub payload_type: Option<String>,
    /// Match only messages from this agent config.
    pub from_config_id: Option<AgentConfigId>,
    /// Match only messages from senders holding this role.
    pub from_role_id: Option<RoleId>,
}

impl SubscriptionFilter {
    /// Matches every message.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches one payload type.
    #[must_use]
    pub fn for_type(payload_type: impl Into<String>) -> Self {
        Self {
            payload_type: Some(payload_type.into()),
            ..Self::default()
        }
    }

    fn matches(&self, message: &MeshMessage) -> bool {
        if let Some(wanted) = &self.payload_type {
            if message.payload.payload_type() != wanted {
                return false;
            }
        }
        if let Some(wanted) = &self.from_config_id {
            if &message.envelope.from.config_id != wanted {
                return false;
            }
        }
        if let Some(wanted) = &self.from_role_id {
            if message.envelope.from.role_id.as_ref() != Some(wanted) {
                return false;
            }
        }
        true
    }
}

/// Handle returned by [`Router::subscribe`]; pass to
/// [`Router::unsubscribe`] to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    filter: SubscriptionFilter,
    handler: MessageHandler,
}

/// Options for [`Router::send`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Inherit an exchange's correlation id instead of minting one.
    pub correlation_id: Option<CorrelationId>,
    /// Drop the message once it is this old (clamped to protocol range).
    pub ttl_seconds: Option<u32>,
}

/// Insertion-ordered dedup window with batched FIFO eviction.
struct DedupWindow {
    seen: HashSet<MessageId>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Remembers `id`; returns `false` if it was already present.
    fn insert(&mut self, id: MessageId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);

        if self.order.len() > self.capacity {
            let evict = (self.capacity / DEDUP_EVICT_DIVISOR).max(1);
            for _ in 0..evict {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Routes messages between local subscribers and peer gateways.
///
/// # Example
///
/// ```
/// use lattice_protocol::MessagePayload;
/// use lattice_runtime::{Router, SendOptions, SubscriptionFilter};
/// use lattice_types::{AgentIdentity, AgentInstanceId};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let mut router = Router::new("gw-a");
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&hits);
/// router.subscribe(
///     SubscriptionFilter::for_type("heartbeat"),
///     Arc::new(move |_msg| {
///         counter.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     }),
/// );
///
/// let sensor = AgentIdentity::new(AgentInstanceId::new(), "sensor", "gw-a");
/// router.send(
///     sensor,
///     None,
///     MessagePayload::Heartbeat { load: 0.1, active_tasks: None, status_line: None },
///     SendOptions::default(),
/// );
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
pub struct Router {
    gateway_id: GatewayId,
    local_agents: HashMap<AgentInstanceId, AgentIdentity>,
    peers: HashMap<GatewayId, PeerGateway>,
    subscriptions: Vec<Subscription>,
    next_subscription: u64,
    seen: DedupWindow,
    transport: Arc<dyn PeerTransport>,
}

impl Router {
    /// Creates a router for `gateway_id` with the no-op transport.
    #[must_use]
    pub fn new(gateway_id: impl Into<GatewayId>) -> Self {
        Self::with_transport(gateway_id, Arc::new(NullTransport))
    }

    /// Creates a router with an injected peer transport.
    #[must_use]
    pub fn with_transport(
        gateway_id: impl Into<GatewayId>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            local_agents: HashMap::new(),
            peers: HashMap::new(),
            subscriptions: Vec::new(),
            next_subscription: 0,
            seen: DedupWindow::new(DEDUP_CAPACITY),
            transport,
        }
    }

    /// The gateway this router serves.
    #[must_use]
    pub fn gateway_id(&self) -> &GatewayId {
        &self.gateway_id
    }

    // ─── Local agents ───────────────────────────────────────────────

    /// Registers (or re-registers) a local agent.
    pub fn register_local_agent(&mut self, identity: AgentIdentity) {
        self.local_agents.insert(identity.instance_id, identity);
    }

    /// Removes a local agent; returns its identity if it was present.
    pub fn unregister_local_agent(
        &mut self,
        instance_id: &AgentInstanceId,
    ) -> Option<AgentIdentity> {
        self.local_agents.remove(instance_id)
    }

    /// Returns `true` if the instance is registered locally.
    #[must_use]
    pub fn is_local(&self, instance_id: &AgentInstanceId) -> bool {
        self.local_agents.contains_key(instance_id)
    }

    /// Snapshot of all locally registered agents.
    #[must_use]
    pub fn local_agents(&self) -> Vec<AgentIdentity> {
        self.local_agents.values().cloned().collect()
    }

    /// Looks up one local agent.
    #[must_use]
    pub fn local_agent(&self, instance_id: &AgentInstanceId) -> Option<&AgentIdentity> {
        self.local_agents.get(instance_id)
    }

    // ─── Peers ──────────────────────────────────────────────────────

    /// Adds or replaces a peer gateway.
    pub fn register_peer(&mut self, peer: PeerGateway) {
        self.peers.insert(peer.gateway_id.clone(), peer);
    }

    /// Removes a peer gateway.
    pub fn remove_peer(&mut self, gateway_id: &GatewayId) -> Option<PeerGateway> {
        self.peers.remove(gateway_id)
    }

    /// Updates a peer's connection status; returns `false` if unknown.
    pub fn set_peer_status(&mut self, gateway_id: &GatewayId, status: PeerStatus) -> bool {
        match self.peers.get_mut(gateway_id) {
            Some(peer) => {
                peer.status = status;
                true
            }
            None => false,
        }
    }

    /// Number of registered peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    // ─── Subscriptions ──────────────────────────────────────────────

    /// Registers a filtered handler; returns the id used to release it.
    pub fn subscribe(
        &mut self,
        filter: SubscriptionFilter,
        handler: MessageHandler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscriptions.push(Subscription {
            id,
            filter,
            handler,
        });
        id
    }

    /// Releases a subscription; returns `false` if it was not held.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of remembered message ids (test observability).
    #[must_use]
    pub fn dedup_len(&self) -> usize {
        self.seen.len()
    }

    // ─── Sending & routing ──────────────────────────────────────────

    /// Builds an envelope for `payload` and routes it immediately.
    ///
    /// Direction is `request` when `to` is present, `broadcast`
    /// otherwise. Returns the envelope (its `message_id` is already in
    /// the dedup window, so re-routing it later is a no-op).
    pub fn send(
        &mut self,
        from: AgentIdentity,
        to: Option<AgentIdentity>,
        payload: MessagePayload,
        opts: SendOptions,
    ) -> Envelope {
        let mut envelope = match to {
            Some(to) => Envelope::request(from, to),
            None => Envelope::broadcast(from),
        };
        if let Some(correlation) = opts.correlation_id {
            envelope = envelope.with_correlation(correlation);
        }
        if let Some(ttl) = opts.ttl_seconds {
            envelope = envelope.with_ttl(ttl);
        }

        self.route(MeshMessage::new(envelope.clone(), payload));
        envelope
    }

    /// Entry point for locally originated and peer-received messages.
    pub fn route(&mut self, message: MeshMessage) {
        if !self.seen.insert(message.envelope.message_id) {
            debug!(id = %message.envelope.message_id, "dropping duplicate message");
            return;
        }
        if message.envelope.is_expired(chrono::Utc::now()) {
            debug!(id = %message.envelope.message_id, "dropping expired message");
            return;
        }
        if message.envelope.hop_exhausted() {
            debug!(id = %message.envelope.message_id, "dropping message with exhausted hop budget");
            return;
        }

        let is_broadcast = message.envelope.direction == Direction::Broadcast;
        let (is_local, is_remote) = match &message.envelope.to {
            None => (true, false),
            Some(to) => {
                let local = to.gateway_id == self.gateway_id;
                (local, !local)
            }
        };

        if is_local || is_broadcast {
            self.dispatch_local(&message);
        }
        if is_remote || is_broadcast {
            self.forward_to_peers(&message);
        }
    }

    fn dispatch_local(&self, message: &MeshMessage) {
        for sub in &self.subscriptions {
            if !sub.filter.matches(message) {
                continue;
            }
            if let Err(error) = (sub.handler)(message) {
                warn!(
                    id = %message.envelope.message_id,
                    payload = message.payload.payload_type(),
                    %error,
                    "subscription handler failed"
                );
            }
        }
    }

    fn forward_to_peers(&self, message: &MeshMessage) {
        let forwarded = MeshMessage::new(message.envelope.next_hop(), message.payload.clone());
        let target_gateway = match message.envelope.direction {
            Direction::Broadcast => None,
            _ => message.envelope.to.as_ref().map(|to| &to.gateway_id),
        };

        for peer in self.peers.values() {
            if peer.status != PeerStatus::Connected {
                continue;
            }
            if let Some(target) = target_gateway {
                if &peer.gateway_id != target {
                    continue;
                }
            }
            self.transport.send_to_peer(peer, &forwarded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn agent(config: &str, gateway: &str) -> AgentIdentity {
        AgentIdentity::new(AgentInstanceId::new(), config, gateway)
    }

    fn heartbeat() -> MessagePayload {
        MessagePayload::Heartbeat {
            load: 0.2,
            active_tasks: None,
            status_line: None,
        }
    }

    fn counting_handler() -> (Arc<AtomicUsize>, MessageHandler) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handler: MessageHandler = Arc::new(move |_msg| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (hits, handler)
    }

    /// Transport that records (peer, message) pairs.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(GatewayId, MeshMessage)>>,
    }

    impl PeerTransport for RecordingTransport {
        fn send_to_peer(&self, peer: &PeerGateway, message: &MeshMessage) {
            self.sent
                .lock()
                .push((peer.gateway_id.clone(), message.clone()));
        }
    }

    #[test]
    fn broadcast_reaches_all_matching_subscribers() {
        let mut router = Router::new("gw-a");
        let (hits_all, handler_all) = counting_handler();
        let (hits_hb, handler_hb) = counting_handler();
        let (hits_other, handler_other) = counting_handler();

        router.subscribe(SubscriptionFilter::any(), handler_all);
        router.subscribe(SubscriptionFilter::for_type("heartbeat"), handler_hb);
        router.subscribe(SubscriptionFilter::for_type("task.result"), handler_other);

        router.send(agent("a", "gw-a"), None, heartbeat(), SendOptions::default());

        assert_eq!(hits_all.load(Ordering::SeqCst), 1);
        assert_eq!(hits_hb.load(Ordering::SeqCst), 1);
        assert_eq!(hits_other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn duplicate_message_delivered_once() {
        let mut router = Router::new("gw-a");
        let (hits, handler) = counting_handler();
        router.subscribe(SubscriptionFilter::any(), handler);

        let envelope = router.send(agent("a", "gw-a"), None, heartbeat(), SendOptions::default());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // same message arrives again (e.g. echoed back by a peer)
        router.route(MeshMessage::new(envelope, heartbeat()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_message_is_dropped() {
        let mut router = Router::new("gw-a");
        let (hits, handler) = counting_handler();
        router.subscribe(SubscriptionFilter::any(), handler);

        let mut envelope = Envelope::broadcast(agent("a", "gw-a")).with_ttl(5);
        envelope.timestamp = chrono::Utc::now() - Duration::seconds(10);
        router.route(MeshMessage::new(envelope, heartbeat()));

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn hop_exhausted_message_is_dropped() {
        let mut router = Router::new("gw-a");
        let (hits, handler) = counting_handler();
        router.subscribe(SubscriptionFilter::any(), handler);

        let envelope = Envelope::broadcast(agent("a", "gw-a")).with_hop_count(16);
        router.route(MeshMessage::new(envelope, heartbeat()));

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn filters_on_sender_config_and_role() {
        let mut router = Router::new("gw-a");
        let (hits_cfg, handler_cfg) = counting_handler();
        let (hits_role, handler_role) = counting_handler();

        router.subscribe(
            SubscriptionFilter {
                from_config_id: Some("sensor".into()),
                ..SubscriptionFilter::default()
            },
            handler_cfg,
        );
        router.subscribe(
            SubscriptionFilter {
                from_role_id: Some("monitor".into()),
                ..SubscriptionFilter::default()
            },
            handler_role,
        );

        router.send(agent("sensor", "gw-a"), None, heartbeat(), SendOptions::default());
        router.send(
            agent("other", "gw-a").with_role("monitor"),
            None,
            heartbeat(),
            SendOptions::default(),
        );

        assert_eq!(hits_cfg.load(Ordering::SeqCst), 1);
        assert_eq!(hits_role.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let mut router = Router::new("gw-a");
        let failing: MessageHandler = Arc::new(|_msg| Err("boom".into()));
        let (hits, handler) = counting_handler();

        router.subscribe(SubscriptionFilter::any(), failing);
        router.subscribe(SubscriptionFilter::any(), handler);

        router.send(agent("a", "gw-a"), None, heartbeat(), SendOptions::default());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut router = Router::new("gw-a");
        let (hits, handler) = counting_handler();
        let id = router.subscribe(SubscriptionFilter::any(), handler);

        router.send(agent("a", "gw-a"), None, heartbeat(), SendOptions::default());
        assert!(router.unsubscribe(id));
        assert!(!router.unsubscribe(id));
        router.send(agent("a", "gw-a"), None, heartbeat(), SendOptions::default());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broadcast_forwards_to_all_connected_peers() {
        let transport = Arc::new(RecordingTransport::default());
        let mut router = Router::with_transport("gw-a", Arc::clone(&transport) as _);

        router.register_peer(PeerGateway::new("gw-b").with_status(PeerStatus::Connected));
        router.register_peer(PeerGateway::new("gw-c").with_status(PeerStatus::Connected));
        router.register_peer(PeerGateway::new("gw-d").with_status(PeerStatus::Disconnected));

        router.send(agent("a", "gw-a"), None, heartbeat(), SendOptions::default());

        let sent = transport.sent.lock();
        let mut gateways: Vec<&str> = sent.iter().map(|(g, _)| g.as_str()).collect();
        gateways.sort_unstable();
        assert_eq!(gateways, vec!["gw-b", "gw-c"]);
        // forwarded copies carry the incremented hop count
        assert_eq!(sent[0].1.envelope.hop_count, Some(1));
    }

    #[test]
    fn targeted_message_forwards_only_to_matching_peer() {
        let transport = Arc::new(RecordingTransport::default());
        let mut router = Router::with_transport("gw-a", Arc::clone(&transport) as _);

        router.register_peer(PeerGateway::new("gw-b").with_status(PeerStatus::Connected));
        router.register_peer(PeerGateway::new("gw-c").with_status(PeerStatus::Connected));

        router.send(
            agent("a", "gw-a"),
            Some(agent("b", "gw-b")),
            heartbeat(),
            SendOptions::default(),
        );

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_str(), "gw-b");
    }

    #[test]
    fn targeted_local_message_is_not_forwarded() {
        let transport = Arc::new(RecordingTransport::default());
        let mut router = Router::with_transport("gw-a", Arc::clone(&transport) as _);
        router.register_peer(PeerGateway::new("gw-b").with_status(PeerStatus::Connected));

        let (hits, handler) = counting_handler();
        router.subscribe(SubscriptionFilter::any(), handler);

        router.send(
            agent("a", "gw-a"),
            Some(agent("b", "gw-a")),
            heartbeat(),
            SendOptions::default(),
        );

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn remote_message_skips_local_dispatch() {
        let mut router = Router::new("gw-a");
        let (hits, handler) = counting_handler();
        router.subscribe(SubscriptionFilter::any(), handler);

        router.send(
            agent("a", "gw-a"),
            Some(agent("b", "gw-b")),
            heartbeat(),
            SendOptions::default(),
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dedup_window_evicts_fifo_on_overflow() {
        let mut window = DedupWindow::new(10);
        let ids: Vec<MessageId> = (0..11).map(|_| MessageId::new()).collect();

        for id in &ids[..10] {
            assert!(window.insert(*id));
        }
        assert_eq!(window.len(), 10);

        // 11th insert trips the 20% eviction: ids[0], ids[1] leave
        assert!(window.insert(ids[10]));
        assert_eq!(window.len(), 9);
        // ids[2] survived the eviction, ids[0] did not
        assert!(!window.insert(ids[2]));
        assert!(window.insert(ids[0]));
    }

    #[test]
    fn local_agent_registry() {
        let mut router = Router::new("gw-a");
        let identity = agent("worker", "gw-a");
        let instance = identity.instance_id;

        router.register_local_agent(identity.clone());
        assert!(router.is_local(&instance));
        assert_eq!(router.local_agents().len(), 1);

        let removed = router.unregister_local_agent(&instance);
        assert_eq!(removed, Some(identity));
        assert!(!router.is_local(&instance));
    }

    #[test]
    fn send_returns_envelope_with_inherited_correlation() {
        let mut router = Router::new("gw-a");
        let correlation = CorrelationId::new();
        let envelope = router.send(
            agent("a", "gw-a"),
            None,
            heartbeat(),
            SendOptions {
                correlation_id: Some(correlation),
                ttl_seconds: Some(30),
            },
        );

        assert_eq!(envelope.correlation_id, correlation);
        assert_eq!(envelope.ttl_seconds, Some(30));
        assert_eq!(envelope.direction, Direction::Broadcast);
    }
}
