//! Lenient readers for loosely typed JSON objects.
//!
//! Gossip payloads, stored membership blobs and command packs all arrive
//! as untyped JSON. These helpers coerce the common shapes and silently
//! ignore anything else, so a single odd field never rejects a whole
//! record.

use serde_json::Value;

/// A JSON object, the payload type of tasks, metadata and metrics.
pub type JsonMap = serde_json::Map<String, Value>;

/// Read a list of strings. Non-string entries are skipped; a lone string
/// is treated as a one-element list; anything else yields an empty list.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Read an object, defaulting to empty for any other shape.
pub fn object(value: Option<&Value>) -> JsonMap {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => JsonMap::new(),
    }
}

/// Read a non-empty string.
pub fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Coerce a number or a numeric string to `f64`.
pub fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// JavaScript-style truthiness: `null`, `false`, `0`, `""`, `[]` and `{}`
/// are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
