//! Inventory records and queued work items.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::json::{self, JsonMap};

// ────────────────────────────────────────────────────────────────────────────
// NodeInfo
// ────────────────────────────────────────────────────────────────────────────

/// What a node advertises about itself.
///
/// The three sets keep insertion order: candidate ranking iterates them and
/// must be deterministic across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Transport address (a `type.role@place` string or any opaque
    /// endpoint, such as `10.0.0.5`).
    pub address: String,
    #[serde(default)]
    pub capabilities: IndexSet<String>,
    #[serde(default)]
    pub drivers: IndexSet<String>,
    #[serde(default)]
    pub apps: IndexSet<String>,
    #[serde(default, rename = "meta", alias = "metadata")]
    pub metadata: JsonMap,
}

impl NodeInfo {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn with_drivers<I, S>(mut self, drivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drivers.extend(drivers.into_iter().map(Into::into));
        self
    }

    pub fn with_apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apps.extend(apps.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// `true` when every non-empty requirement dimension is a subset of the
    /// corresponding set on this node.
    pub fn satisfies(&self, requirements: &Requirements) -> bool {
        let covers = |have: &IndexSet<String>, want: &[String]| want.iter().all(|w| have.contains(w));
        covers(&self.capabilities, &requirements.capabilities)
            && covers(&self.drivers, &requirements.drivers)
            && covers(&self.apps, &requirements.apps)
    }

    /// Required drivers this node does not have, in requirement order.
    pub fn missing_drivers<'a>(&self, required: &'a [String]) -> Vec<&'a String> {
        required.iter().filter(|d| !self.drivers.contains(*d)).collect()
    }

    pub fn into_record(self, robo_id: impl Into<String>) -> CapabilityRecord {
        CapabilityRecord {
            robo_id: robo_id.into(),
            info: self,
        }
    }
}

/// A [`NodeInfo`] together with the id it is registered under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub robo_id: String,
    #[serde(flatten)]
    pub info: NodeInfo,
}

// ────────────────────────────────────────────────────────────────────────────
// Requirements
// ────────────────────────────────────────────────────────────────────────────

/// What a command pack needs from the node that runs it.
///
/// Empty dimensions impose no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub drivers: Vec<String>,
    #[serde(default)]
    pub apps: Vec<String>,
}

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn with_drivers<I, S>(mut self, drivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drivers.extend(drivers.into_iter().map(Into::into));
        self
    }

    pub fn with_apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apps.extend(apps.into_iter().map(Into::into));
        self
    }

    /// Read requirements leniently from a JSON object. Missing or
    /// malformed dimensions default to empty.
    pub fn from_value(value: &Value) -> Self {
        Self {
            capabilities: json::string_list(value.get("capabilities")),
            drivers: json::string_list(value.get("drivers")),
            apps: json::string_list(value.get("apps")),
        }
    }

    /// The same requirements with the driver dimension dropped.
    pub fn without_drivers(&self) -> Self {
        Self {
            capabilities: self.capabilities.clone(),
            drivers: Vec::new(),
            apps: self.apps.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty() && self.drivers.is_empty() && self.apps.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// NodeTask
// ────────────────────────────────────────────────────────────────────────────

/// A unit of work queued for a specific node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTask {
    pub task_id: Uuid,
    pub payload: JsonMap,
    /// Unix timestamp (seconds) at enqueue time.
    pub created_at: f64,
}

impl NodeTask {
    pub fn new(payload: JsonMap, created_at: f64) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            payload,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lidar_node() -> NodeInfo {
        NodeInfo::new("robot.scout@dock")
            .with_capabilities(["lidar", "drive", "lidar"])
            .with_drivers(["driver.lidar"])
            .with_apps(["mapper"])
    }

    #[test]
    fn sets_deduplicate_and_keep_order() {
        let node = lidar_node();
        let caps: Vec<_> = node.capabilities.iter().map(String::as_str).collect();
        assert_eq!(caps, vec!["lidar", "drive"]);
    }

    #[test]
    fn satisfies_uses_and_semantics() {
        let node = lidar_node();
        assert!(node.satisfies(&Requirements::new()));
        assert!(node.satisfies(&Requirements::new().with_capabilities(["lidar"]).with_apps(["mapper"])));
        assert!(!node.satisfies(&Requirements::new().with_capabilities(["lidar", "camera"])));
        assert!(!node.satisfies(
            &Requirements::new()
                .with_capabilities(["lidar"])
                .with_drivers(["driver.camera"])
        ));
    }

    #[test]
    fn missing_drivers_preserves_requirement_order() {
        let node = lidar_node();
        let required = vec!["driver.b".to_string(), "driver.lidar".to_string(), "driver.a".to_string()];
        assert_eq!(node.missing_drivers(&required), vec!["driver.b", "driver.a"]);
    }

    #[test]
    fn requirements_from_value_is_lenient() {
        let req = Requirements::from_value(&json!({
            "capabilities": ["lidar"],
            "drivers": "driver.lidar",
            "apps": 5
        }));
        assert_eq!(req.capabilities, vec!["lidar"]);
        assert_eq!(req.drivers, vec!["driver.lidar"]);
        assert!(req.apps.is_empty());
        assert!(Requirements::from_value(&json!(null)).is_empty());
        assert!(req.without_drivers().drivers.is_empty());
    }

    #[test]
    fn record_flattens_node_info() {
        let record = lidar_node().with_metadata("battery", json!(80)).into_record("scout-1");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["robo_id"], "scout-1");
        assert_eq!(value["address"], "robot.scout@dock");
        assert_eq!(value["meta"]["battery"], 80);
    }

    #[test]
    fn node_task_gets_unique_ids() {
        let a = NodeTask::new(JsonMap::new(), 1.0);
        let b = NodeTask::new(JsonMap::new(), 1.0);
        assert_ne!(a.task_id, b.task_id);
    }
}
