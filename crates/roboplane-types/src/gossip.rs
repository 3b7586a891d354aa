//! [`NodeSnapshot`] – the gossip wire payload.
//!
//! ```json
//! {"robo_id": "x", "address": "10.0.0.5", "capabilities": ["lift"],
//!  "drivers": [], "apps": [], "meta": {}, "heartbeat": 1000.0}
//! ```
//!
//! `robo_id` and `address` are mandatory. Every other field defaults to
//! empty when missing or malformed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MeshError;
use crate::json::{self, JsonMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub robo_id: String,
    pub address: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub drivers: Vec<String>,
    #[serde(default)]
    pub apps: Vec<String>,
    #[serde(default)]
    pub meta: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<f64>,
}

impl NodeSnapshot {
    /// Decode a gossip payload leniently.
    ///
    /// # Errors
    ///
    /// [`MeshError::MalformedGossip`] when the value is not an object or
    /// lacks a non-empty `robo_id` / `address`.
    pub fn from_value(value: &Value) -> Result<Self, MeshError> {
        let obj = value
            .as_object()
            .ok_or_else(|| MeshError::MalformedGossip("payload is not an object".to_string()))?;
        let robo_id = json::non_empty_str(obj.get("robo_id"))
            .ok_or_else(|| MeshError::MalformedGossip("missing robo_id".to_string()))?;
        let address = json::non_empty_str(obj.get("address"))
            .ok_or_else(|| MeshError::MalformedGossip("missing address".to_string()))?;

        Ok(Self {
            robo_id: robo_id.to_string(),
            address: address.to_string(),
            capabilities: json::string_list(obj.get("capabilities")),
            drivers: json::string_list(obj.get("drivers")),
            apps: json::string_list(obj.get("apps")),
            meta: json::object(obj.get("meta")),
            heartbeat: json::as_f64(obj.get("heartbeat")),
        })
    }

    /// Decode from raw JSON text.
    pub fn from_json(text: &str) -> Result<Self, MeshError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| MeshError::MalformedGossip(e.to_string()))?;
        Self::from_value(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_minimal_payload() {
        let snap = NodeSnapshot::from_json(
            r#"{"robo_id":"x","address":"10.0.0.5","capabilities":["lift"],"heartbeat":1000.0}"#,
        )
        .unwrap();
        assert_eq!(snap.robo_id, "x");
        assert_eq!(snap.address, "10.0.0.5");
        assert_eq!(snap.capabilities, vec!["lift"]);
        assert!(snap.drivers.is_empty());
        assert_eq!(snap.heartbeat, Some(1000.0));
    }

    #[test]
    fn heartbeat_accepts_numeric_string() {
        let snap = NodeSnapshot::from_value(&json!({
            "robo_id": "x", "address": "a.b@c", "heartbeat": "12.5"
        }))
        .unwrap();
        assert_eq!(snap.heartbeat, Some(12.5));

        let snap = NodeSnapshot::from_value(&json!({
            "robo_id": "x", "address": "a.b@c", "heartbeat": "later"
        }))
        .unwrap();
        assert!(snap.heartbeat.is_none());
    }

    #[test]
    fn rejects_missing_identity() {
        for bad in [
            json!({"address": "10.0.0.5"}),
            json!({"robo_id": "x"}),
            json!({"robo_id": "", "address": "10.0.0.5"}),
            json!(["robo_id", "x"]),
        ] {
            assert!(matches!(
                NodeSnapshot::from_value(&bad),
                Err(MeshError::MalformedGossip(_))
            ));
        }
        assert!(NodeSnapshot::from_json("{oops").is_err());
    }

    #[test]
    fn serializes_to_wire_shape() {
        let snap = NodeSnapshot::from_value(&json!({
            "robo_id": "x", "address": "10.0.0.5", "meta": {"zone": 2}
        }))
        .unwrap();
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["meta"]["zone"], 2);
        assert_eq!(value["apps"], json!([]));
        assert!(value.get("heartbeat").is_none());
        assert_eq!(NodeSnapshot::from_value(&value).unwrap(), snap);
    }
}
