use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Global error type spanning address parsing, shared-store failures,
/// transport failures and the recoverable errors the runtime swallows.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeshError {
    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Store Error: {0}")]
    Store(String),

    #[error("Transport Error sending to {recipient}: {details}")]
    Transport { recipient: String, details: String },

    #[error("Malformed gossip payload: {0}")]
    MalformedGossip(String),

    #[error("Driver install failed for {driver} on {target}: {details}")]
    DriverInstall {
        target: String,
        driver: String,
        details: String,
    },

    #[error("Task handler failed: {0}")]
    Handler(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

impl MeshError {
    /// Shorthand for a [`MeshError::Transport`] error.
    pub fn transport(recipient: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Transport {
            recipient: recipient.into(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
