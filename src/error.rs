//! Error types for strata.

use std::fmt;

use crate::persistence::PersistenceError;
use crate::provider::ProviderError;

/// Errors that can occur during indexing/search operations.
#[derive(Debug)]
pub enum VaultError {
    /// Embedding length does not match the owner's index dimension.
    DimensionMismatch { expected: usize, actual: usize },
    /// The owner's index is at capacity.
    CapacityExceeded { capacity: usize },
    /// Invalid parameter value.
    InvalidParameter(String),
    /// No index exists for the given owner key.
    OwnerNotFound(String),
    /// Embedding generation failed; propagated, never retried here.
    Provider(ProviderError),
    /// Snapshot save/load failure; recoverable by retry or rebuild.
    Persistence(PersistenceError),
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultError::DimensionMismatch { expected, actual } => write!(
                f,
                "dimension mismatch: index expects {expected} dimensions, got {actual}",
            ),
            VaultError::CapacityExceeded { capacity } => {
                write!(f, "index full: capacity {capacity} reached")
            }
            VaultError::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            VaultError::OwnerNotFound(owner) => write!(f, "no index for owner {owner:?}"),
            VaultError::Provider(e) => write!(f, "embedding provider failed: {e}"),
            VaultError::Persistence(e) => write!(f, "persistence failed: {e}"),
        }
    }
}

impl std::error::Error for VaultError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VaultError::Provider(e) => Some(e),
            VaultError::Persistence(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProviderError> for VaultError {
    fn from(e: ProviderError) -> Self {
        VaultError::Provider(e)
    }
}

impl From<PersistenceError> for VaultError {
    fn from(e: PersistenceError) -> Self {
        VaultError::Persistence(e)
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
