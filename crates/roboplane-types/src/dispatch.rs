//! Dispatch results and telemetry records.
//!
//! A dispatch never fails with an error: it always ends in a
//! [`DispatchOutcome`] whose [`DispatchStatus`] callers branch on, and each
//! terminal decision is mirrored into an append-only [`DispatchEvent`] log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json::{self, JsonMap};

/// Terminal state of a single dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// Delivered to a candidate.
    Dispatched,
    /// No registered node matched the requirements.
    NoCandidates,
    /// Candidates matched but none could obtain the required drivers.
    DriversMissing,
    /// Ready candidates existed but every send failed.
    DeliveryFailed,
}

impl DispatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::NoCandidates => "no_candidates",
            Self::DriversMissing => "drivers_missing",
            Self::DeliveryFailed => "delivery_failed",
        }
    }
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result returned by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    pub target: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub installed_drivers: Vec<String>,
    #[serde(default)]
    pub missing_drivers: Vec<String>,
    pub reason: Option<String>,
    #[serde(default)]
    pub attempted_targets: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub metrics: JsonMap,
}

impl DispatchOutcome {
    /// An outcome with the given status and every other field empty.
    pub fn new(status: DispatchStatus) -> Self {
        Self {
            status,
            target: None,
            address: None,
            installed_drivers: Vec::new(),
            missing_drivers: Vec::new(),
            reason: None,
            attempted_targets: Vec::new(),
            errors: Vec::new(),
            metrics: JsonMap::new(),
        }
    }

    pub fn is_dispatched(&self) -> bool {
        self.status == DispatchStatus::Dispatched
    }
}

/// One entry in the dispatch telemetry log. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub pack_id: String,
    pub status: DispatchStatus,
    pub target: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub attempts: Vec<String>,
    /// Unix timestamp (seconds).
    pub timestamp: f64,
    pub latency_ms: Option<f64>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: JsonMap,
}

impl DispatchEvent {
    pub fn new(pack_id: impl Into<String>, status: DispatchStatus, timestamp: f64) -> Self {
        Self {
            pack_id: pack_id.into(),
            status,
            target: None,
            address: None,
            attempts: Vec::new(),
            timestamp,
            latency_ms: None,
            error: None,
            metadata: JsonMap::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_attempts(mut self, attempts: Vec<String>) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_failure(&self) -> bool {
        self.status != DispatchStatus::Dispatched
    }
}

/// Identify a command pack for telemetry: the first truthy of `id`, `name`,
/// `command`, `action`, or `"<unknown>"`.
pub fn pack_identifier(pack: &Value) -> String {
    ["id", "name", "command", "action"]
        .iter()
        .filter_map(|key| pack.get(*key))
        .find(|v| json::is_truthy(v))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "<unknown>".to_string())
}
