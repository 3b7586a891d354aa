use roboplane_types::MeshError;
use thiserror::Error;

/// Errors raised by store backends and the registries layered on them.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store lock poisoned")]
    Poisoned,
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),
}

impl From<StoreError> for MeshError {
    fn from(err: StoreError) -> Self {
        MeshError::Store(err.to_string())
    }
}
