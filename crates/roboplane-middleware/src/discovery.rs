//! [`DiscoveryService`] – keeps membership in sync across the mesh.
//!
//! Nodes advertise themselves by publishing a
//! [`NodeSnapshot`][roboplane_types::NodeSnapshot] on the gossip channel.
//! Every discovery service listening on that channel writes what it hears
//! into its own [`MembershipStore`] and [`HeartbeatStore`]. Propagation is
//! best effort and eventually consistent.
//!
//! # Transports
//!
//! | Configured | Used |
//! |---|---|
//! | a [`PubSub`] backend that subscribes successfully | [`DiscoveryTransport::PubSub`] |
//! | no pub/sub, or subscribe fails, with a fallback connector | [`DiscoveryTransport::PushStream`] |
//! | neither | [`DiscoveryTransport::None`] (gossip only applied when fed manually) |
//!
//! Start-up never fails: a broken pub/sub degrades to the push stream.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use roboplane_middleware::DiscoveryService;
//! use roboplane_store::{HeartbeatStore, MemoryStore, MembershipStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let discovery = DiscoveryService::new(
//!     MembershipStore::new(store.clone()),
//!     HeartbeatStore::new(store.clone()),
//! );
//! let applied = discovery
//!     .process_gossip_message(r#"{"robo_id":"x","address":"10.0.0.5","heartbeat":1000.0}"#)
//!     .unwrap();
//! assert!(applied);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use roboplane_kernel::liveness::stale_nodes;
use roboplane_store::{HeartbeatStore, MembershipStore, PubSub, StreamPoll};
use roboplane_types::{Clock, MeshError, NodeInfo, NodeSnapshot, system_clock};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ws_client::{StreamConnector, WebSocketDiscoveryClient};

pub const DEFAULT_GOSSIP_CHANNEL: &str = "mesh:gossip";

/// How long one pub/sub poll waits before re-checking the running flag.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// An inbound gossip payload in any of its accepted shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum GossipMessage {
    Text(String),
    Bytes(Vec<u8>),
    Value(Value),
}

impl From<String> for GossipMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for GossipMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for GossipMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for GossipMessage {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<Value> for GossipMessage {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Which transport [`DiscoveryService::start`] ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryTransport {
    PubSub,
    PushStream,
    None,
}

/// Applies gossip to the local stores. Shared with the listener threads.
struct GossipSink {
    membership: MembershipStore,
    heartbeats: HeartbeatStore,
}

impl GossipSink {
    fn apply(&self, message: GossipMessage) -> Result<bool, MeshError> {
        let snapshot = match decode(message) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(error = %e, "dropping malformed gossip");
                return Ok(false);
            }
        };

        let mut info = NodeInfo::new(snapshot.address)
            .with_capabilities(snapshot.capabilities)
            .with_drivers(snapshot.drivers)
            .with_apps(snapshot.apps);
        info.metadata = snapshot.meta;
        self.membership.join(&snapshot.robo_id, &info)?;
        if let Some(ts) = snapshot.heartbeat {
            self.heartbeats.beat(&snapshot.robo_id, Some(ts))?;
        }
        debug!(robo_id = %snapshot.robo_id, "gossip applied");
        Ok(true)
    }

    fn apply_logged(&self, message: GossipMessage) {
        if let Err(e) = self.apply(message) {
            warn!(error = %e, "failed to apply gossip");
        }
    }
}

fn decode(message: GossipMessage) -> Result<NodeSnapshot, MeshError> {
    match message {
        GossipMessage::Text(text) => NodeSnapshot::from_json(&text),
        GossipMessage::Bytes(bytes) => {
            let text = String::from_utf8(bytes).map_err(|e| MeshError::MalformedGossip(e.to_string()))?;
            NodeSnapshot::from_json(&text)
        }
        GossipMessage::Value(value) => NodeSnapshot::from_value(&value),
    }
}

#[derive(Default)]
struct Listeners {
    pubsub: Option<JoinHandle<()>>,
    push: Option<WebSocketDiscoveryClient>,
    transport: Option<DiscoveryTransport>,
}

pub struct DiscoveryService {
    sink: Arc<GossipSink>,
    pubsub: Option<Arc<dyn PubSub>>,
    channel: String,
    fallback: Option<StreamConnector>,
    clock: Clock,
    running: Arc<AtomicBool>,
    listeners: Mutex<Listeners>,
}

impl DiscoveryService {
    pub fn new(membership: MembershipStore, heartbeats: HeartbeatStore) -> Self {
        Self {
            sink: Arc::new(GossipSink {
                membership,
                heartbeats,
            }),
            pubsub: None,
            channel: DEFAULT_GOSSIP_CHANNEL.to_string(),
            fallback: None,
            clock: system_clock(),
            running: Arc::new(AtomicBool::new(false)),
            listeners: Mutex::new(Listeners::default()),
        }
    }

    pub fn with_pubsub(mut self, pubsub: Arc<dyn PubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Push stream used when pub/sub is unavailable.
    pub fn with_fallback(mut self, connector: StreamConnector) -> Self {
        self.fallback = Some(connector);
        self
    }

    /// Clock used by [`prune_stale_nodes`](Self::prune_stale_nodes).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn membership(&self) -> &MembershipStore {
        &self.sink.membership
    }

    pub fn heartbeats(&self) -> &HeartbeatStore {
        &self.sink.heartbeats
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start listening for gossip. Idempotent: a second call returns the
    /// transport chosen by the first.
    pub fn start(&self) -> DiscoveryTransport {
        let mut listeners = self.listeners();
        if let Some(transport) = listeners.transport {
            return transport;
        }
        self.running.store(true, Ordering::SeqCst);

        let subscription = self.pubsub.as_ref().map(|p| p.subscribe(&self.channel));
        let transport = match subscription {
            Some(Ok(mut stream)) => {
                let sink = Arc::clone(&self.sink);
                let running = Arc::clone(&self.running);
                listeners.pubsub = Some(thread::spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        match stream.poll_message(POLL_TIMEOUT) {
                            StreamPoll::Message(text) => sink.apply_logged(GossipMessage::Text(text)),
                            StreamPoll::Idle => {}
                            StreamPoll::Closed => break,
                        }
                    }
                    stream.close();
                }));
                info!(channel = %self.channel, "discovery listening on pub/sub");
                DiscoveryTransport::PubSub
            }
            failed => {
                if let Some(Err(e)) = failed {
                    warn!(channel = %self.channel, error = %e, "gossip subscription failed; falling back to push stream");
                } else {
                    warn!(channel = %self.channel, "no pub/sub transport; falling back to push stream");
                }
                match &self.fallback {
                    Some(connector) => {
                        let sink = Arc::clone(&self.sink);
                        let mut client = WebSocketDiscoveryClient::new(Arc::clone(connector));
                        client.start(move |text| sink.apply_logged(GossipMessage::Text(text)));
                        listeners.push = Some(client);
                        DiscoveryTransport::PushStream
                    }
                    None => DiscoveryTransport::None,
                }
            }
        };
        listeners.transport = Some(transport);
        transport
    }

    /// Stop listening and join every listener thread.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut listeners = self.listeners();
        if let Some(handle) = listeners.pubsub.take()
            && handle.join().is_err()
        {
            warn!("gossip listener thread panicked");
        }
        if let Some(mut client) = listeners.push.take() {
            client.stop();
        }
        listeners.transport = None;
    }

    /// Publish `payload` on the gossip channel. Returns `false` when there is
    /// no pub/sub transport or the publish failed; neither is an error.
    pub fn broadcast<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        let Some(pubsub) = &self.pubsub else {
            return false;
        };
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "gossip payload not serializable");
                return false;
            }
        };
        match pubsub.publish(&self.channel, &text) {
            Ok(receivers) => {
                debug!(channel = %self.channel, receivers, "gossip published");
                true
            }
            Err(e) => {
                warn!(channel = %self.channel, error = %e, "gossip publish failed");
                false
            }
        }
    }

    /// Apply one gossip payload.
    ///
    /// Returns `Ok(false)` when the payload was malformed or lacked
    /// `robo_id` / `address` and was dropped. Store failures propagate.
    pub fn process_gossip_message(&self, message: impl Into<GossipMessage>) -> Result<bool, MeshError> {
        self.sink.apply(message.into())
    }

    /// Remove every node whose heartbeat is older than `max_age` seconds
    /// from both the membership and heartbeat stores. Returns the pruned ids.
    pub fn prune_stale_nodes(&self, max_age: f64) -> Result<Vec<String>, MeshError> {
        let now = (self.clock)();
        let stale = stale_nodes(&self.sink.heartbeats.all()?, now, max_age);
        for id in &stale {
            self.sink.membership.leave(id)?;
            self.sink.heartbeats.remove(id)?;
        }
        if !stale.is_empty() {
            info!(count = stale.len(), max_age, "pruned stale nodes");
        }
        Ok(stale)
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}
