//! In-process store backend.
//!
//! [`MemoryStore`] implements all three store traits inside one process:
//!
//! * hashes and lists sit behind a single mutex; blocking pops park on a
//!   [`Condvar`] that every `rpush` notifies.
//! * pub/sub uses one [`tokio::sync::broadcast`] channel per channel name,
//!   so every subscriber sees every message and a slow subscriber only
//!   loses its own backlog.
//!
//! Clone the surrounding `Arc` to share one store between components.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::warn;

use crate::backend::{HashStore, ListStore, MessageStream, PubSub, StreamPoll};
use crate::error::StoreError;

/// Buffered messages per pub/sub channel before slow subscribers lag.
const DEFAULT_CAPACITY: usize = 256;

/// Granularity of the pub/sub poll loop.
const POLL_STEP: Duration = Duration::from_millis(5);

#[derive(Default)]
struct Inner {
    hashes: HashMap<String, IndexMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
}

impl Inner {
    fn pop_front(&mut self, key: &str) -> Option<String> {
        let list = self.lists.get_mut(key)?;
        let value = list.pop_front();
        if list.is_empty() {
            self.lists.remove(key);
        }
        value
    }
}

/// Thread-safe in-memory hash, list and pub/sub store.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pushed: Condvar,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a store whose pub/sub channels buffer `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            pushed: Condvar::new(),
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<String>, StoreError> {
        let mut channels = self.channels.lock().map_err(|_| StoreError::Poisoned)?;
        let sender = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(sender.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HashStore for MemoryStore {
    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()?
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    fn hgetall(&self, key: &str) -> Result<IndexMap<String, String>, StoreError> {
        Ok(self.lock()?.hashes.get(key).cloned().unwrap_or_default())
    }

    fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let Some(hash) = inner.hashes.get_mut(key) else {
            return Ok(false);
        };
        let removed = hash.shift_remove(field).is_some();
        if hash.is_empty() {
            inner.hashes.remove(key);
        }
        Ok(removed)
    }
}

impl ListStore for MemoryStore {
    fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let len = {
            let mut inner = self.lock()?;
            let list = inner.lists.entry(key.to_string()).or_default();
            list.push_back(value.to_string());
            list.len()
        };
        self.pushed.notify_all();
        Ok(len)
    }

    fn lpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.pop_front(key))
    }

    fn blpop(&self, key: &str, timeout: Option<Duration>) -> Result<Option<String>, StoreError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.lock()?;
        loop {
            if let Some(value) = inner.pop_front(key) {
                return Ok(Some(value));
            }
            inner = match deadline {
                None => self.pushed.wait(inner).map_err(|_| StoreError::Poisoned)?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    self.pushed
                        .wait_timeout(inner, deadline - now)
                        .map_err(|_| StoreError::Poisoned)?
                        .0
                }
            };
        }
    }
}

impl PubSub for MemoryStore {
    fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError> {
        // A send with no live receivers is not an error here.
        Ok(self.sender(channel)?.send(message.to_string()).unwrap_or(0))
    }

    fn subscribe(&self, channel: &str) -> Result<Box<dyn MessageStream>, StoreError> {
        Ok(Box::new(BroadcastStream {
            channel: channel.to_string(),
            receiver: Some(self.sender(channel)?.subscribe()),
        }))
    }
}

/// A [`MessageStream`] over a broadcast receiver.
struct BroadcastStream {
    channel: String,
    receiver: Option<broadcast::Receiver<String>>,
}

impl MessageStream for BroadcastStream {
    fn poll_message(&mut self, timeout: Duration) -> StreamPoll {
        let Some(receiver) = self.receiver.as_mut() else {
            return StreamPoll::Closed;
        };
        let deadline = Instant::now() + timeout;
        loop {
            match receiver.try_recv() {
                Ok(message) => return StreamPoll::Message(message),
                Err(TryRecvError::Lagged(n)) => {
                    warn!(channel = %self.channel, lagged_by = n, "subscriber lagged; messages dropped");
                }
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return StreamPoll::Closed;
                }
                Err(TryRecvError::Empty) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return StreamPoll::Idle;
                    }
                    std::thread::sleep(POLL_STEP.min(deadline - now));
                }
            }
        }
    }

    fn close(&mut self) {
        self.receiver = None;
    }
}
