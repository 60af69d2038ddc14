//! Error types for the subscription registry.

use thiserror::Error;

/// Main error type for registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Event type already registered: {0}")]
    EventTypeExists(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid record format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },
}

impl RegistryError {
    /// Whether the failure came from the backing store rather than the caller.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, RegistryError::StorageUnavailable(_))
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for RegistryError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RegistryError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RegistryError::Deserialization(e.to_string())
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
