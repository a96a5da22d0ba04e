//! Registry error types

use crate::engine::EngineError;
use flowunit_storage::StorageError;
use flowunit_types::{InvalidChangeType, ValidationError, VersionFormatError, VersionId};
use thiserror::Error;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("Invalid version: {0}")]
    Format(#[from] VersionFormatError),

    #[error(transparent)]
    InvalidChangeType(#[from] InvalidChangeType),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("No active version for function unit {0}")]
    NoActiveVersion(String),

    #[error("Function unit {name} has multiple active versions: {versions:?}")]
    MultipleActiveVersions { name: String, versions: Vec<String> },

    #[error("Grants of {0} cannot be changed: version is not active")]
    GrantsNotEditable(VersionId),

    #[error("Workflow engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),
}

impl From<StorageError> for RegistryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => RegistryError::NotFound(what),
            other => RegistryError::Storage(other),
        }
    }
}

impl RegistryError {
    /// True when the failure came from a concurrent writer.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RegistryError::Storage(err) if err.is_conflict())
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
