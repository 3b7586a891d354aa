//! Liveness classification from heartbeat timestamps.
//!
//! Works on plain Unix-second timestamps so it can be fed straight from a
//! [`HeartbeatStore`](roboplane_store::HeartbeatStore) and an injectable
//! clock.

use indexmap::IndexMap;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Health state reported for a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeHealth {
    /// Heartbeat seen within the grace period.
    Healthy,
    /// Last heartbeat is older than the grace period.
    Stale,
    /// No heartbeat has ever been recorded.
    Unknown,
}

/// Classify a node given its last heartbeat, the current time and the
/// grace period (all in seconds).
pub fn classify(last_seen: Option<f64>, now: f64, grace: f64) -> NodeHealth {
    match last_seen {
        None => NodeHealth::Unknown,
        Some(ts) if now - ts <= grace => NodeHealth::Healthy,
        Some(_) => NodeHealth::Stale,
    }
}

/// Ids whose heartbeat is strictly older than `max_age`, in map order.
pub fn stale_nodes(heartbeats: &IndexMap<String, f64>, now: f64, max_age: f64) -> Vec<String> {
    heartbeats
        .iter()
        .filter(|(_, ts)| now - **ts > max_age)
        .map(|(id, _)| id.clone())
        .collect()
}
