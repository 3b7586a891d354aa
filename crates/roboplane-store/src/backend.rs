//! Store traits.
//!
//! | Trait | Operations | Used by |
//! |---|---|---|
//! | [`HashStore`] | `hset` / `hget` / `hgetall` / `hdel` | membership, heartbeats, sessions |
//! | [`ListStore`] | `rpush` / `lpop` / `blpop` | task queues |
//! | [`PubSub`] | `publish` / `subscribe` | gossip |
//!
//! Every call is a single-key operation; nothing here offers atomicity
//! across keys.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use crate::error::StoreError;
use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;

/// A map of string fields stored under a key.
pub trait HashStore: Send + Sync {
    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// All fields in insertion order.
    fn hgetall(&self, key: &str) -> Result<IndexMap<String, String>, StoreError>;

    /// Returns `true` when the field existed.
    fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError>;
}

/// FIFO lists of strings.
pub trait ListStore: Send + Sync {
    /// Append and return the new list length.
    fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    fn lpop(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Pop, waiting up to `timeout` for an element. `None` waits forever.
    fn blpop(&self, key: &str, timeout: Option<Duration>) -> Result<Option<String>, StoreError>;
}

/// Fire-and-forget channels.
pub trait PubSub: Send + Sync {
    /// Returns the number of subscribers that were handed the message.
    fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError>;

    fn subscribe(&self, channel: &str) -> Result<Box<dyn MessageStream>, StoreError>;
}

/// Result of a single [`MessageStream::poll_message`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPoll {
    Message(String),
    /// Nothing arrived within the timeout.
    Idle,
    /// The stream has ended and will never yield again.
    Closed,
}

/// A pull-based subscription.
///
/// Listener threads call [`poll_message`](Self::poll_message) with a short
/// timeout so they can observe their running flag between polls.
pub trait MessageStream: Send {
    fn poll_message(&mut self, timeout: Duration) -> StreamPoll;

    /// Stop receiving. Subsequent polls return [`StreamPoll::Closed`].
    fn close(&mut self);
}

/// The set of backends a control plane runs against.
#[derive(Clone)]
pub struct StoreHandles {
    pub hashes: Arc<dyn HashStore>,
    pub lists: Arc<dyn ListStore>,
    /// `None` when the backend cannot publish (discovery then falls back to
    /// a push stream).
    pub pubsub: Option<Arc<dyn PubSub>>,
}

impl StoreHandles {
    /// A fresh in-process [`MemoryStore`] serving all three roles.
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            hashes: store.clone(),
            lists: store.clone(),
            pubsub: Some(store),
        }
    }

    /// A [`SqliteStore`] at `path`. SQLite has no pub/sub.
    pub fn sqlite(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Arc::new(SqliteStore::open(path)?);
        Ok(Self {
            hashes: store.clone(),
            lists: store,
            pubsub: None,
        })
    }
}

impl std::fmt::Debug for StoreHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandles")
            .field("pubsub", &self.pubsub.is_some())
            .finish_non_exhaustive()
    }
}
