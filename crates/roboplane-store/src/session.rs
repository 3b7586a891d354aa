//! Active communication sessions: `session_id -> [participant ids]`,
//! stored as JSON arrays in one hash.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::backend::HashStore;
use crate::error::StoreError;

pub const DEFAULT_SESSION_KEY: &str = "mesh:sessions";

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn HashStore>,
    key: String,
}

impl SessionStore {
    pub fn new(store: Arc<dyn HashStore>) -> Self {
        Self::with_key(store, DEFAULT_SESSION_KEY)
    }

    pub fn with_key(store: Arc<dyn HashStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Register (or replace) a session with its participants.
    pub fn start<I, S>(&self, session_id: &str, participants: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = participants.into_iter().map(|p| p.as_ref().to_string()).collect();
        self.store
            .hset(&self.key, session_id, &serde_json::to_string(&ids)?)
    }

    /// Returns `true` when the session existed.
    pub fn end(&self, session_id: &str) -> Result<bool, StoreError> {
        self.store.hdel(&self.key, session_id)
    }

    pub fn sessions(&self) -> Result<IndexMap<String, Vec<String>>, StoreError> {
        self.store
            .hgetall(&self.key)?
            .into_iter()
            .map(|(id, raw)| {
                let participants: Vec<String> = serde_json::from_str(&raw)?;
                Ok::<_, StoreError>((id, participants))
            })
            .collect()
    }
}
