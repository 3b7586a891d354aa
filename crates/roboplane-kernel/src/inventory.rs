//! [`InventoryCache`] – process-local view of node inventory.
//!
//! The cache wraps a [`MembershipStore`] and keeps `id -> NodeInfo` in an
//! [`IndexMap`] so iteration follows registration order. All reads and
//! writes go through one mutex.
//!
//! Every mutation is written to the store first and committed to the cache
//! only once the store accepted it, so the registry stays the source of
//! truth after a restart and a failed write never leaves the cache ahead of
//! the store.

use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use roboplane_store::{MembershipStore, MembershipUpdate};
use roboplane_types::{MeshError, NodeInfo, Requirements};

/// Cached node inventory backed by a [`MembershipStore`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use roboplane_kernel::InventoryCache;
/// use roboplane_store::{MemoryStore, MembershipStore};
/// use roboplane_types::{NodeInfo, Requirements};
///
/// let registry = MembershipStore::new(Arc::new(MemoryStore::new()));
/// let cache = InventoryCache::new(registry).unwrap();
/// cache.register("scout-1", NodeInfo::new("robot.scout@dock").with_capabilities(["lidar"])).unwrap();
///
/// let found = cache.find_nodes(&Requirements::new().with_capabilities(["lidar"]));
/// assert!(found.contains_key("scout-1"));
/// ```
pub struct InventoryCache {
    registry: MembershipStore,
    nodes: Mutex<IndexMap<String, NodeInfo>>,
}

impl InventoryCache {
    /// Build a cache hydrated with every current registry member.
    pub fn new(registry: MembershipStore) -> Result<Self, MeshError> {
        let nodes = registry.members()?;
        Ok(Self {
            registry,
            nodes: Mutex::new(nodes),
        })
    }

    pub fn registry(&self) -> &MembershipStore {
        &self.registry
    }

    fn nodes(&self) -> MutexGuard<'_, IndexMap<String, NodeInfo>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or replace) a node.
    pub fn register(&self, id: impl AsRef<str>, info: NodeInfo) -> Result<(), MeshError> {
        let id = id.as_ref();
        let mut nodes = self.nodes();
        self.registry.join(id, &info)?;
        nodes.insert(id.to_string(), info);
        Ok(())
    }

    /// Remove a node from the registry and the cache.
    pub fn unregister(&self, id: impl AsRef<str>) -> Result<(), MeshError> {
        let id = id.as_ref();
        let mut nodes = self.nodes();
        self.registry.leave(id)?;
        nodes.shift_remove(id);
        Ok(())
    }

    /// Look up a node, falling back to the registry on a cache miss.
    pub fn get(&self, id: impl AsRef<str>) -> Result<Option<NodeInfo>, MeshError> {
        let mut nodes = self.nodes();
        self.get_locked(&mut nodes, id.as_ref())
    }

    /// Cache lookup with hydrate-on-miss, under a guard the caller holds.
    fn get_locked(
        &self,
        nodes: &mut IndexMap<String, NodeInfo>,
        id: &str,
    ) -> Result<Option<NodeInfo>, MeshError> {
        if let Some(info) = nodes.get(id) {
            return Ok(Some(info.clone()));
        }
        let Some(info) = self.registry.get(id)? else {
            return Ok(None);
        };
        Ok(Some(nodes.entry(id.to_string()).or_insert(info).clone()))
    }

    /// Read, modify and write one record while holding the cache lock.
    fn modify_locked(
        &self,
        nodes: &mut IndexMap<String, NodeInfo>,
        id: &str,
        update: &MembershipUpdate,
    ) -> Result<Option<NodeInfo>, MeshError> {
        let Some(mut info) = self.get_locked(nodes, id)? else {
            return Ok(None);
        };
        if update.is_empty() {
            return Ok(Some(info));
        }
        update.apply_to(&mut info);
        self.registry.join(id, &info)?;
        nodes.insert(id.to_string(), info.clone());
        Ok(Some(info))
    }

    /// Apply a partial update. Returns the updated record, or `None` when
    /// the node is unknown.
    pub fn update_inventory(
        &self,
        id: impl AsRef<str>,
        update: &MembershipUpdate,
    ) -> Result<Option<NodeInfo>, MeshError> {
        let mut nodes = self.nodes();
        self.modify_locked(&mut nodes, id.as_ref(), update)
    }

    /// Record an installed app. Returns `false` for unknown nodes.
    pub fn add_app(&self, id: impl AsRef<str>, app: &str) -> Result<bool, MeshError> {
        let id = id.as_ref();
        let mut nodes = self.nodes();
        let Some(info) = self.get_locked(&mut nodes, id)? else {
            return Ok(false);
        };
        if !info.apps.contains(app) {
            let apps = info.apps.iter().cloned().chain([app.to_string()]);
            self.modify_locked(&mut nodes, id, &MembershipUpdate::new().apps(apps))?;
        }
        Ok(true)
    }

    /// Record an installed driver. Returns `false` for unknown nodes.
    pub fn add_driver(&self, id: impl AsRef<str>, driver: &str) -> Result<bool, MeshError> {
        let id = id.as_ref();
        let mut nodes = self.nodes();
        let Some(info) = self.get_locked(&mut nodes, id)? else {
            return Ok(false);
        };
        if !info.drivers.contains(driver) {
            let drivers = info.drivers.iter().cloned().chain([driver.to_string()]);
            self.modify_locked(&mut nodes, id, &MembershipUpdate::new().drivers(drivers))?;
        }
        Ok(true)
    }

    /// Cache-only check.
    pub fn has_app(&self, id: &str, app: &str) -> bool {
        self.nodes().get(id).is_some_and(|info| info.apps.contains(app))
    }

    /// Cache-only check.
    pub fn has_driver(&self, id: &str, driver: &str) -> bool {
        self.nodes()
            .get(id)
            .is_some_and(|info| info.drivers.contains(driver))
    }

    /// Nodes in the registry advertising `capability`. Matching records
    /// are refreshed into the cache.
    pub fn find_by_capability(&self, capability: &str) -> Result<IndexMap<String, NodeInfo>, MeshError> {
        let matches: IndexMap<String, NodeInfo> = self
            .registry
            .members()?
            .into_iter()
            .filter(|(_, info)| info.capabilities.contains(capability))
            .collect();
        let mut nodes = self.nodes();
        for (id, info) in &matches {
            nodes.insert(id.clone(), info.clone());
        }
        Ok(matches)
    }

    /// Cached nodes satisfying every non-empty dimension of
    /// `requirements`, in registration order.
    pub fn find_nodes(&self, requirements: &Requirements) -> IndexMap<String, NodeInfo> {
        self.nodes()
            .iter()
            .filter(|(_, info)| info.satisfies(requirements))
            .map(|(id, info)| (id.clone(), info.clone()))
            .collect()
    }

    /// Snapshot of every cached node. Later mutations do not show through.
    pub fn all_nodes(&self) -> IndexMap<String, NodeInfo> {
        self.nodes().clone()
    }

    /// Reload the whole cache from the registry.
    pub fn refresh(&self) -> Result<usize, MeshError> {
        let members = self.registry.members()?;
        let count = members.len();
        *self.nodes() = members;
        Ok(count)
    }

    /// Drop a node from the cache without touching the registry.
    pub fn forget(&self, id: &str) -> bool {
        self.nodes().shift_remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes().is_empty()
    }
}
