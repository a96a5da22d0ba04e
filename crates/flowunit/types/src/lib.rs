//! Flowunit core types
//!
//! Shared vocabulary for the function unit versioning engine:
//! - `SemanticVersion` and `ChangeType` for version arithmetic
//! - version, definition, grant and instance records
//! - lifecycle events emitted by the deployment service
//! - input validation rules applied before any store access

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod events;
pub mod ids;
pub mod unit;
pub mod validation;
pub mod version;

// Re-exports
pub use events::{EventSeverity, UnitEvent, UnitEventEnvelope};
pub use ids::{GrantId, InstanceId, VersionId};
pub use unit::{
    definition_key, AccessGrant, AccessRule, AccessType, DefinitionSnapshot, FunctionUnitVersion,
    InstanceStatus, ProcessInstance, TargetType,
};
pub use validation::{
    validate_definition, validate_unit_name, validate_user_id, ValidationError, MAX_UNIT_NAME_LEN,
};
pub use version::{ChangeType, InvalidChangeType, SemanticVersion, VersionFormatError};
