//! [`NodeAddress`] – the canonical identity of a node in the mesh.
//!
//! Addresses have the textual form `type.role@place#instance`, where the
//! `#instance` suffix is optional:
//!
//! | Field | Example | Rule |
//! |---|---|---|
//! | `type` | `robot` | non-empty, no `.` and no `@` |
//! | `role` | `lift` | non-empty, may contain `.` |
//! | `place` | `warehouse-3` | non-empty, no `#` |
//! | `instance` | `7` | optional; an empty suffix is treated as absent |
//!
//! Two addresses are *visible to each other* when they share the same
//! `place`.
//!
//! # Example
//!
//! ```
//! use roboplane_types::NodeAddress;
//!
//! let addr: NodeAddress = "robot.lift@dock#2".parse().unwrap();
//! assert_eq!(addr.role, "lift");
//! assert_eq!(addr.to_string(), "robot.lift@dock#2");
//!
//! let peer = NodeAddress::new("robot", "scanner", "dock");
//! assert!(addr.is_visible_to(&peer));
//! assert!((addr.similarity(&peer) - 0.5).abs() < f64::EPSILON);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MeshError;

/// A parsed `type.role@place#instance` node address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress {
    pub node_type: String,
    pub role: String,
    pub place: String,
    pub instance: Option<String>,
}

/// One of the four comparable address components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressField {
    Type,
    Role,
    Place,
    Instance,
}

/// Result of [`NodeAddress::compare`].
#[derive(Debug, Clone, PartialEq)]
pub struct AddressComparison {
    /// Fraction of matching fields, in `[0, 1]`.
    pub similarity: f64,
    /// Fields that differ, in `type`, `role`, `place`, `instance` order.
    pub differences: Vec<AddressField>,
}

impl NodeAddress {
    /// Build an address without an instance suffix.
    pub fn new(node_type: impl Into<String>, role: impl Into<String>, place: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            role: role.into(),
            place: place.into(),
            instance: None,
        }
    }

    /// Attach an instance suffix (builder-style).
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        let instance = instance.into();
        self.instance = if instance.is_empty() { None } else { Some(instance) };
        self
    }

    /// Parse `type.role@place[#instance]`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidAddress`] when any mandatory component is
    /// missing or empty.
    pub fn parse(addr: &str) -> Result<Self, MeshError> {
        let invalid = |reason: &str| MeshError::InvalidAddress {
            address: addr.to_string(),
            reason: reason.to_string(),
        };

        let (type_role, rest) = addr
            .split_once('@')
            .ok_or_else(|| invalid("missing '@' separator"))?;
        let (place, instance) = match rest.split_once('#') {
            Some((place, instance)) => (place, Some(instance)),
            None => (rest, None),
        };
        if place.is_empty() {
            return Err(invalid("place is empty"));
        }

        let (node_type, role) = type_role
            .split_once('.')
            .ok_or_else(|| invalid("missing '.' between type and role"))?;
        if node_type.is_empty() || role.is_empty() {
            return Err(invalid("type and role must both be non-empty"));
        }

        Ok(Self {
            node_type: node_type.to_string(),
            role: role.to_string(),
            place: place.to_string(),
            instance: instance.filter(|i| !i.is_empty()).map(str::to_string),
        })
    }

    /// Compare field by field against `other`.
    pub fn compare(&self, other: &NodeAddress) -> AddressComparison {
        let checks = [
            (AddressField::Type, self.node_type == other.node_type),
            (AddressField::Role, self.role == other.role),
            (AddressField::Place, self.place == other.place),
            (AddressField::Instance, self.instance == other.instance),
        ];
        let matching = checks.iter().filter(|(_, same)| *same).count();
        AddressComparison {
            similarity: matching as f64 / checks.len() as f64,
            differences: checks
                .iter()
                .filter(|(_, same)| !*same)
                .map(|(field, _)| *field)
                .collect(),
        }
    }

    /// Fraction of matching fields, in `[0, 1]`.
    pub fn similarity(&self, other: &NodeAddress) -> f64 {
        self.compare(other).similarity
    }

    /// `1 - similarity`.
    pub fn distance(&self, other: &NodeAddress) -> f64 {
        1.0 - self.similarity(other)
    }

    /// Nodes can see each other when they share a `place`.
    pub fn is_visible_to(&self, other: &NodeAddress) -> bool {
        self.place == other.place
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.node_type, self.role, self.place)?;
        if let Some(instance) = &self.instance {
            write!(f, "#{instance}")?;
        }
        Ok(())
    }
}

impl FromStr for NodeAddress {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<NodeAddress> for NodeAddress {
    fn as_ref(&self) -> &NodeAddress {
        self
    }
}

impl Serialize for NodeAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_address() {
        let addr = NodeAddress::parse("robot.lift@warehouse#7").unwrap();
        assert_eq!(addr.node_type, "robot");
        assert_eq!(addr.role, "lift");
        assert_eq!(addr.place, "warehouse");
        assert_eq!(addr.instance.as_deref(), Some("7"));
    }

    #[test]
    fn parse_without_instance() {
        let addr = NodeAddress::parse("drone.scout@field").unwrap();
        assert!(addr.instance.is_none());
    }

    #[test]
    fn empty_instance_is_normalised_to_none() {
        let addr = NodeAddress::parse("drone.scout@field#").unwrap();
        assert!(addr.instance.is_none());
        assert_eq!(addr.to_string(), "drone.scout@field");
    }

    #[test]
    fn role_may_contain_dots() {
        let addr = NodeAddress::parse("robot.arm.left@cell-4").unwrap();
        assert_eq!(addr.node_type, "robot");
        assert_eq!(addr.role, "arm.left");
    }

    #[test]
    fn format_is_inverse_of_parse() {
        for raw in [
            "robot.lift@warehouse#7",
            "drone.scout@field",
            "agent.planner.v2@cloud#eu-1",
            "cam.rgb@dock#a#b",
        ] {
            let parsed = NodeAddress::parse(raw).unwrap();
            assert_eq!(parsed.to_string(), raw, "round-trip failed for {raw}");
        }
    }

    #[test]
    fn rejects_malformed_addresses() {
        for raw in ["", "robot", "robot@dock", ".lift@dock", "robot.@dock", "robot.lift@", "robot.lift@#1"] {
            let err = NodeAddress::parse(raw).unwrap_err();
            assert!(
                matches!(err, MeshError::InvalidAddress { .. }),
                "expected InvalidAddress for {raw:?}"
            );
        }
    }

    #[test]
    fn compare_reports_differences() {
        let a = NodeAddress::new("robot", "lift", "dock").with_instance("1");
        let b = NodeAddress::new("robot", "scanner", "dock").with_instance("2");
        let cmp = a.compare(&b);
        assert!((cmp.similarity - 0.5).abs() < f64::EPSILON);
        assert_eq!(cmp.differences, vec![AddressField::Role, AddressField::Instance]);
        assert!((a.distance(&b) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn identical_addresses_have_zero_distance() {
        let a = NodeAddress::new("robot", "lift", "dock");
        assert!((a.similarity(&a.clone()) - 1.0).abs() < f64::EPSILON);
        assert!(a.distance(&a.clone()).abs() < f64::EPSILON);
    }

    #[test]
    fn visibility_is_symmetric_and_place_based() {
        let a = NodeAddress::new("robot", "lift", "dock");
        let b = NodeAddress::new("drone", "scout", "dock");
        let c = NodeAddress::new("robot", "lift", "yard");
        assert!(a.is_visible_to(&b) && b.is_visible_to(&a));
        assert!(!a.is_visible_to(&c) && !c.is_visible_to(&a));
    }

    #[test]
    fn serializes_as_canonical_string() {
        let addr = NodeAddress::new("robot", "lift", "dock").with_instance("3");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"robot.lift@dock#3\"");
        let back: NodeAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<NodeAddress>("\"nonsense\"").is_err());
    }
}
