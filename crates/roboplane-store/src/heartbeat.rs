//! Last-seen timestamps, one hash field per node.
//!
//! Timestamps are stored as decimal strings of Unix seconds. Fields that do
//! not parse as a float are ignored on read.

use std::sync::Arc;

use indexmap::IndexMap;
use roboplane_types::{Clock, system_clock};

use crate::backend::HashStore;
use crate::error::StoreError;

pub const DEFAULT_HEARTBEAT_KEY: &str = "mesh:heartbeats";

#[derive(Clone)]
pub struct HeartbeatStore {
    store: Arc<dyn HashStore>,
    key: String,
    clock: Clock,
}

impl HeartbeatStore {
    pub fn new(store: Arc<dyn HashStore>) -> Self {
        Self::with_key(store, DEFAULT_HEARTBEAT_KEY)
    }

    pub fn with_key(store: Arc<dyn HashStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            clock: system_clock(),
        }
    }

    /// Replace the clock used when `beat` is called without a timestamp.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> f64 {
        (self.clock)()
    }

    /// Record a heartbeat at `timestamp` (default: now) and return the
    /// stored value.
    pub fn beat(&self, id: impl AsRef<str>, timestamp: Option<f64>) -> Result<f64, StoreError> {
        let ts = timestamp.unwrap_or_else(|| self.now());
        self.store.hset(&self.key, id.as_ref(), &ts.to_string())?;
        Ok(ts)
    }

    pub fn last_seen(&self, id: impl AsRef<str>) -> Result<Option<f64>, StoreError> {
        Ok(self
            .store
            .hget(&self.key, id.as_ref())?
            .and_then(|raw| raw.trim().parse::<f64>().ok()))
    }

    pub fn remove(&self, id: impl AsRef<str>) -> Result<bool, StoreError> {
        self.store.hdel(&self.key, id.as_ref())
    }

    pub fn all(&self) -> Result<IndexMap<String, f64>, StoreError> {
        Ok(self
            .store
            .hgetall(&self.key)?
            .into_iter()
            .filter_map(|(id, raw)| raw.trim().parse::<f64>().ok().map(|ts| (id, ts)))
            .collect())
    }
}
