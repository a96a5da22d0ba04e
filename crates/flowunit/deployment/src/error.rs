//! Deployment error types

use flowunit_registry::{EngineError, RegistryError};
use flowunit_storage::StorageError;
use flowunit_types::{SemanticVersion, ValidationError, VersionFormatError};
use thiserror::Error;

/// Deployment and rollback errors
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("Version {version} of {name} already exists")]
    DuplicateVersion {
        name: String,
        version: SemanticVersion,
    },

    #[error("Workflow engine deployment of {definition_key} failed")]
    DeploymentFailed {
        definition_key: String,
        #[source]
        source: EngineError,
    },

    #[error("Invalid rollback: {0}")]
    InvalidRollback(String),

    #[error("{operation} transaction failed")]
    TransactionFailed {
        operation: String,
        #[source]
        source: Box<DeploymentError>,
    },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl From<StorageError> for DeploymentError {
    fn from(err: StorageError) -> Self {
        DeploymentError::Registry(RegistryError::from(err))
    }
}

impl From<VersionFormatError> for DeploymentError {
    fn from(err: VersionFormatError) -> Self {
        DeploymentError::Registry(RegistryError::Format(err))
    }
}

impl DeploymentError {
    pub(crate) fn transaction_failed(operation: &str, source: DeploymentError) -> Self {
        DeploymentError::TransactionFailed {
            operation: operation.to_string(),
            source: Box::new(source),
        }
    }

    /// True when the failure was a concurrent-write conflict. Only these are retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DeploymentError::Registry(err) if err.is_conflict())
    }

    /// True when a referenced version, unit or instance does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DeploymentError::Registry(RegistryError::NotFound(_)))
    }
}

/// Result type for deployment operations
pub type Result<T> = std::result::Result<T, DeploymentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        let conflict: DeploymentError = StorageError::Conflict("row changed".into()).into();
        assert!(conflict.is_conflict());

        let wrapped = DeploymentError::transaction_failed("deploy", conflict);
        assert!(!wrapped.is_conflict());
        assert_eq!(wrapped.to_string(), "deploy transaction failed");

        let missing: DeploymentError = StorageError::NotFound("version:9".into()).into();
        assert!(missing.is_not_found());
        assert!(!missing.is_conflict());
    }
}
