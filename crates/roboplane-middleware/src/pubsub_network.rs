//! [`PubSubNetwork`] – a [`NetworkInterface`] over any [`PubSub`] backend.
//!
//! A node listens on the channel named after its own id and on the shared
//! broadcast channel. A pump thread drains both subscriptions into an
//! inbox that [`receive`](NetworkInterface::receive) pops from, tagging each
//! message with the channel it arrived on.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use roboplane_store::{MessageStream, PubSub, StreamPoll};
use roboplane_types::MeshError;
use serde_json::Value;
use tracing::{debug, warn};

use crate::memory_network::BROADCAST_RECIPIENT;
use crate::network::NetworkInterface;

const POLL_TIMEOUT: Duration = Duration::from_millis(10);

type Inbox = Arc<Mutex<VecDeque<(String, Value)>>>;

pub struct PubSubNetwork {
    pubsub: Arc<dyn PubSub>,
    node_id: String,
    broadcast_channel: String,
    inbox: Inbox,
    running: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl PubSubNetwork {
    /// Subscribe `node_id` to its own channel and to `"broadcast"`.
    pub fn new(pubsub: Arc<dyn PubSub>, node_id: impl Into<String>) -> Result<Self, MeshError> {
        Self::with_broadcast_channel(pubsub, node_id, BROADCAST_RECIPIENT)
    }

    pub fn with_broadcast_channel(
        pubsub: Arc<dyn PubSub>,
        node_id: impl Into<String>,
        broadcast_channel: impl Into<String>,
    ) -> Result<Self, MeshError> {
        let node_id = node_id.into();
        let broadcast_channel = broadcast_channel.into();
        if node_id.is_empty() {
            return Err(MeshError::transport(node_id, "node id must be non-empty"));
        }
        let direct = pubsub.subscribe(&node_id)?;
        let shared = pubsub.subscribe(&broadcast_channel)?;

        let inbox: Inbox = Arc::new(Mutex::new(VecDeque::new()));
        let running = Arc::new(AtomicBool::new(true));
        let pump = spawn_pump(
            vec![(node_id.clone(), direct), (broadcast_channel.clone(), shared)],
            Arc::clone(&inbox),
            Arc::clone(&running),
        );
        debug!(node = %node_id, channel = %broadcast_channel, "pub/sub network attached");

        Ok(Self {
            pubsub,
            node_id,
            broadcast_channel,
            inbox,
            running,
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn inbox(&self) -> MutexGuard<'_, VecDeque<(String, Value)>> {
        lock(&self.inbox)
    }

    fn publish(&self, channel: &str, message: &Value) -> Result<(), MeshError> {
        if channel.is_empty() {
            return Err(MeshError::transport(channel, "recipient must be non-empty"));
        }
        let text = serde_json::to_string(message)?;
        self.pubsub
            .publish(channel, &text)
            .map(|_| ())
            .map_err(|e| MeshError::transport(channel, e.to_string()))
    }

    /// Stop the pump thread and drop both subscriptions. Idempotent.
    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!(node = %self.node_id, "pub/sub pump thread panicked");
        }
    }
}

fn lock(inbox: &Inbox) -> MutexGuard<'_, VecDeque<(String, Value)>> {
    inbox.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_pump(
    mut streams: Vec<(String, Box<dyn MessageStream>)>,
    inbox: Inbox,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while running.load(Ordering::SeqCst) && !streams.is_empty() {
            streams.retain_mut(|(channel, stream)| match stream.poll_message(POLL_TIMEOUT) {
                StreamPoll::Message(text) => {
                    match serde_json::from_str::<Value>(&text) {
                        Ok(message) => lock(&inbox).push_back((channel.clone(), message)),
                        Err(e) => debug!(channel = %channel, error = %e, "dropping non-JSON message"),
                    }
                    true
                }
                StreamPoll::Idle => true,
                StreamPoll::Closed => false,
            });
        }
        for (_, stream) in &mut streams {
            stream.close();
        }
    })
}

impl NetworkInterface for PubSubNetwork {
    fn send(&self, recipient: &str, message: &Value) -> Result<(), MeshError> {
        self.publish(recipient, message)
    }

    fn broadcast(&self, message: &Value) -> Result<(), MeshError> {
        self.publish(&self.broadcast_channel, message)
    }

    fn receive(&self) -> Option<(String, Value)> {
        self.inbox().pop_front()
    }
}

impl Drop for PubSubNetwork {
    fn drop(&mut self) {
        self.close();
    }
}
