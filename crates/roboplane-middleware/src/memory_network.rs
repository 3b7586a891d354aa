//! [`MemoryNetwork`] – bounded in-process transport.
//!
//! Every `send` and `broadcast` lands in one FIFO queue that `receive`
//! drains. Broadcasts are queued under the recipient `"broadcast"`. When the
//! queue is full the message is dropped, counted, and the caller gets a
//! [`MeshError::Transport`].

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use roboplane_types::{MeshError, unix_now};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::network::NetworkInterface;

/// Default number of queued messages.
const DEFAULT_MAX_QUEUE: usize = 1024;

/// Recipient tag used for broadcasts.
pub const BROADCAST_RECIPIENT: &str = "broadcast";

/// Snapshot returned by [`MemoryNetwork::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkStats {
    pub sent: u64,
    pub broadcast: u64,
    pub received: u64,
    pub dropped: u64,
    /// Unix timestamp of the last queue operation.
    pub last_activity: Option<f64>,
    /// Time the last received message spent in the queue.
    pub last_latency_ms: Option<f64>,
    pub last_error: Option<String>,
    pub queue_size: usize,
}

struct Queued {
    recipient: String,
    message: Value,
    enqueued_at: Instant,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Queued>,
    stats: NetworkStats,
}

pub struct MemoryNetwork {
    state: Mutex<State>,
    max_queue: usize,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_QUEUE)
    }

    pub fn with_capacity(max_queue: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_queue: max_queue.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, recipient: &str, message: &Value, is_broadcast: bool) -> Result<(), MeshError> {
        if recipient.is_empty() {
            return Err(MeshError::transport(recipient, "recipient must be non-empty"));
        }
        if !message.is_object() {
            return Err(MeshError::transport(recipient, "message must be a JSON object"));
        }

        let mut state = self.state();
        state.stats.last_activity = Some(unix_now());
        if state.queue.len() >= self.max_queue {
            state.stats.dropped += 1;
            state.stats.last_error = Some("queue_full".to_string());
            warn!(recipient = %recipient, "network queue full; dropping message");
            return Err(MeshError::transport(recipient, "queue_full"));
        }
        state.queue.push_back(Queued {
            recipient: recipient.to_string(),
            message: message.clone(),
            enqueued_at: Instant::now(),
        });
        if is_broadcast {
            state.stats.broadcast += 1;
        } else {
            state.stats.sent += 1;
        }
        state.stats.last_error = None;
        debug!(recipient = %recipient, broadcast = is_broadcast, "message queued");
        Ok(())
    }

    pub fn stats(&self) -> NetworkStats {
        let state = self.state();
        NetworkStats {
            queue_size: state.queue.len(),
            ..state.stats.clone()
        }
    }

    pub fn queue_len(&self) -> usize {
        self.state().queue.len()
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkInterface for MemoryNetwork {
    fn send(&self, recipient: &str, message: &Value) -> Result<(), MeshError> {
        self.enqueue(recipient, message, false)
    }

    fn broadcast(&self, message: &Value) -> Result<(), MeshError> {
        self.enqueue(BROADCAST_RECIPIENT, message, true)
    }

    fn receive(&self) -> Option<(String, Value)> {
        let mut state = self.state();
        let queued = state.queue.pop_front()?;
        state.stats.received += 1;
        state.stats.last_activity = Some(unix_now());
        state.stats.last_latency_ms = Some(queued.enqueued_at.elapsed().as_secs_f64() * 1000.0);
        Some((queued.recipient, queued.message))
    }
}
