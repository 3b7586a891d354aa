//! Registry of mesh members.
//!
//! Each node is stored as one JSON blob in a single hash field, so a
//! record is always written atomically even though the store offers no
//! multi-key transactions:
//!
//! ```json
//! {"address": "robot.scout@dock", "capabilities": ["lidar"],
//!  "drivers": ["driver.lidar"], "apps": [], "meta": {}}
//! ```
//!
//! Values that are not JSON are read as a bare address string, which is
//! how older registries stored members.

use std::sync::Arc;

use indexmap::IndexMap;
use roboplane_types::json::{self, JsonMap};
use roboplane_types::{NodeAddress, NodeInfo};
use serde_json::Value;

use crate::backend::HashStore;
use crate::error::StoreError;

pub const DEFAULT_MEMBERSHIP_KEY: &str = "mesh:nodes";

/// Partial update of a membership record. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MembershipUpdate {
    pub address: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub drivers: Option<Vec<String>>,
    pub apps: Option<Vec<String>>,
    pub meta: Option<JsonMap>,
}

impl MembershipUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = Some(capabilities.into_iter().map(Into::into).collect());
        self
    }

    pub fn drivers<I, S>(mut self, drivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drivers = Some(drivers.into_iter().map(Into::into).collect());
        self
    }

    pub fn apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apps = Some(apps.into_iter().map(Into::into).collect());
        self
    }

    pub fn meta(mut self, meta: JsonMap) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrite the provided fields of `info`. Sets are replaced, not
    /// merged.
    pub fn apply_to(&self, info: &mut NodeInfo) {
        if let Some(address) = &self.address {
            info.address = address.clone();
        }
        if let Some(capabilities) = &self.capabilities {
            info.capabilities = capabilities.iter().cloned().collect();
        }
        if let Some(drivers) = &self.drivers {
            info.drivers = drivers.iter().cloned().collect();
        }
        if let Some(apps) = &self.apps {
            info.apps = apps.iter().cloned().collect();
        }
        if let Some(meta) = &self.meta {
            info.metadata = meta.clone();
        }
    }
}

/// Filter for [`MembershipStore::find`]. `None` fields match anything.
///
/// The address filters parse the member *id* as a [`NodeAddress`]; ids
/// that do not parse never match.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub node_type: Option<String>,
    pub role: Option<String>,
    pub place: Option<String>,
    pub capability: Option<String>,
    pub driver: Option<String>,
    pub app: Option<String>,
}

impl NodeFilter {
    fn matches(&self, id: &NodeAddress, record: &NodeInfo) -> bool {
        let eq = |want: &Option<String>, have: &str| want.as_deref().is_none_or(|w| w == have);
        let has = |want: &Option<String>, set: &indexmap::IndexSet<String>| {
            want.as_ref().is_none_or(|w| set.contains(w))
        };
        eq(&self.node_type, &id.node_type)
            && eq(&self.role, &id.role)
            && eq(&self.place, &id.place)
            && has(&self.capability, &record.capabilities)
            && has(&self.driver, &record.drivers)
            && has(&self.app, &record.apps)
    }
}

/// `id -> NodeInfo` registry over a shared hash.
#[derive(Clone)]
pub struct MembershipStore {
    store: Arc<dyn HashStore>,
    key: String,
}

impl MembershipStore {
    pub fn new(store: Arc<dyn HashStore>) -> Self {
        Self::with_key(store, DEFAULT_MEMBERSHIP_KEY)
    }

    pub fn with_key(store: Arc<dyn HashStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Register or overwrite a node.
    pub fn join(&self, id: impl AsRef<str>, record: &NodeInfo) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        self.store.hset(&self.key, id.as_ref(), &payload)
    }

    /// Remove a node. Returns `true` when it was registered.
    pub fn leave(&self, id: impl AsRef<str>) -> Result<bool, StoreError> {
        self.store.hdel(&self.key, id.as_ref())
    }

    pub fn get(&self, id: impl AsRef<str>) -> Result<Option<NodeInfo>, StoreError> {
        Ok(self
            .store
            .hget(&self.key, id.as_ref())?
            .map(|raw| decode_record(&raw)))
    }

    /// Apply a partial update. Unknown ids are left alone and yield
    /// `false`.
    pub fn update(&self, id: impl AsRef<str>, update: &MembershipUpdate) -> Result<bool, StoreError> {
        let id = id.as_ref();
        let Some(mut record) = self.get(id)? else {
            return Ok(false);
        };
        update.apply_to(&mut record);
        self.join(id, &record)?;
        Ok(true)
    }

    /// Every member in registration order.
    pub fn members(&self) -> Result<IndexMap<String, NodeInfo>, StoreError> {
        Ok(self
            .store
            .hgetall(&self.key)?
            .into_iter()
            .map(|(id, raw)| {
                let record = decode_record(&raw);
                (id, record)
            })
            .collect())
    }

    /// Members whose id and record match every field of `filter`.
    pub fn find(&self, filter: &NodeFilter) -> Result<IndexMap<String, NodeInfo>, StoreError> {
        Ok(self
            .members()?
            .into_iter()
            .filter(|(id, record)| {
                NodeAddress::parse(id).is_ok_and(|addr| filter.matches(&addr, record))
            })
            .collect())
    }
}

fn decode_record(raw: &str) -> NodeInfo {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(obj)) => NodeInfo {
            address: obj
                .get("address")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            capabilities: json::string_list(obj.get("capabilities")).into_iter().collect(),
            drivers: json::string_list(obj.get("drivers")).into_iter().collect(),
            apps: json::string_list(obj.get("apps")).into_iter().collect(),
            metadata: json::object(obj.get("meta")),
        },
        Ok(Value::String(address)) => NodeInfo::new(address),
        Ok(_) => NodeInfo::default(),
        Err(_) => NodeInfo::new(raw),
    }
}
