//! [`CapabilityDirectory`] – capability-oriented queries over an
//! [`InventoryCache`].
//!
//! Results are [`CapabilityRecord`]s: detached copies that carry the node
//! id alongside its inventory.

use std::sync::Arc;

use indexmap::IndexMap;
use roboplane_store::MembershipUpdate;
use roboplane_types::{CapabilityRecord, MeshError, NodeInfo, Requirements};

use crate::inventory::InventoryCache;

pub struct CapabilityDirectory {
    inventory: Arc<InventoryCache>,
}

impl CapabilityDirectory {
    pub fn new(inventory: Arc<InventoryCache>) -> Self {
        Self { inventory }
    }

    pub fn inventory(&self) -> &Arc<InventoryCache> {
        &self.inventory
    }

    /// Register a node and return its record.
    pub fn register(&self, id: &str, info: NodeInfo) -> Result<CapabilityRecord, MeshError> {
        self.inventory.register(id, info.clone())?;
        Ok(info.into_record(id))
    }

    /// Partially update a node. `None` when the node is unknown.
    pub fn update(
        &self,
        id: &str,
        update: &MembershipUpdate,
    ) -> Result<Option<CapabilityRecord>, MeshError> {
        Ok(self
            .inventory
            .update_inventory(id, update)?
            .map(|info| info.into_record(id)))
    }

    pub fn get(&self, id: &str) -> Result<Option<CapabilityRecord>, MeshError> {
        Ok(self.inventory.get(id)?.map(|info| info.into_record(id)))
    }

    pub fn all_nodes(&self) -> IndexMap<String, CapabilityRecord> {
        self.inventory
            .all_nodes()
            .into_iter()
            .map(|(id, info)| {
                let record = info.into_record(id.clone());
                (id, record)
            })
            .collect()
    }

    /// Nodes satisfying `requirements`, in registration order.
    pub fn find(&self, requirements: &Requirements) -> Vec<CapabilityRecord> {
        self.inventory
            .find_nodes(requirements)
            .into_iter()
            .map(|(id, info)| info.into_record(id))
            .collect()
    }

    /// `true` iff the node exists and satisfies every dimension.
    pub fn has_requirements(&self, id: &str, requirements: &Requirements) -> Result<bool, MeshError> {
        Ok(self
            .inventory
            .get(id)?
            .is_some_and(|info| info.satisfies(requirements)))
    }

    /// Record that `driver` is now installed on `id`.
    pub fn mark_driver_available(&self, id: &str, driver: &str) -> Result<bool, MeshError> {
        self.inventory.add_driver(id, driver)
    }

    pub fn has_driver(&self, id: &str, driver: &str) -> bool {
        self.inventory.has_driver(id, driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roboplane_store::{MemoryStore, MembershipStore};

    fn directory() -> CapabilityDirectory {
        let registry = MembershipStore::new(Arc::new(MemoryStore::new()));
        CapabilityDirectory::new(Arc::new(InventoryCache::new(registry).unwrap()))
    }

    #[test]
    fn register_returns_record() {
        let dir = directory();
        let record = dir
            .register("n1", NodeInfo::new("a.b@c").with_capabilities(["lidar"]))
            .unwrap();
        assert_eq!(record.robo_id, "n1");
        assert!(record.info.capabilities.contains("lidar"));
        assert_eq!(dir.get("n1").unwrap(), Some(record));
    }

    #[test]
    fn has_requirements_checks_every_dimension() {
        let dir = directory();
        dir.register(
            "n1",
            NodeInfo::new("a")
                .with_capabilities(["lidar"])
                .with_drivers(["d1"])
                .with_apps(["mapper"]),
        )
        .unwrap();
        let full = Requirements::new()
            .with_capabilities(["lidar"])
            .with_drivers(["d1"])
            .with_apps(["mapper"]);
        assert!(dir.has_requirements("n1", &full).unwrap());
        assert!(!dir.has_requirements("n1", &full.clone().with_apps(["planner"])).unwrap());
        assert!(!dir.has_requirements("ghost", &Requirements::new()).unwrap());
    }

    #[test]
    fn mark_driver_available_is_visible() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("a")).unwrap();
        assert!(!dir.has_driver("n1", "d1"));
        assert!(dir.mark_driver_available("n1", "d1").unwrap());
        assert!(dir.has_driver("n1", "d1"));
        let found = dir.find(&Requirements::new().with_drivers(["d1"]));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn update_and_all_nodes() {
        let dir = directory();
        dir.register("n1", NodeInfo::new("a")).unwrap();
        dir.register("n2", NodeInfo::new("b")).unwrap();
        let updated = dir
            .update("n2", &MembershipUpdate::new().address("c"))
            .unwrap()
            .unwrap();
        assert_eq!(updated.info.address, "c");
        assert!(dir.update("ghost", &MembershipUpdate::new()).unwrap().is_none());
        let ids: Vec<_> = dir.all_nodes().into_keys().collect();
        assert_eq!(ids, vec!["n1", "n2"]);
    }
}
