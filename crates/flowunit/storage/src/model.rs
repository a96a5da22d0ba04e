use chrono::{DateTime, Utc};
use flowunit_types::{SemanticVersion, VersionId};
use serde::{Deserialize, Serialize};

/// A version row to be inserted. New rows always start inactive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVersion {
    pub name: String,
    pub version: SemanticVersion,
    pub previous_version: Option<VersionId>,
    pub metadata: serde_json::Value,
    pub deployed_at: DateTime<Utc>,
}

/// A definition snapshot to be inserted for an existing version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDefinition {
    pub version_id: VersionId,
    pub definition_key: String,
    pub raw_definition: String,
}
