//! Read models for listing units and their history

use chrono::{DateTime, Utc};
use flowunit_types::{FunctionUnitVersion, SemanticVersion, VersionId};
use serde::{Deserialize, Serialize};

/// One row per function unit with an active version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionUnitDisplay {
    pub name: String,
    pub current_version: SemanticVersion,
    pub deployed_at: DateTime<Utc>,
    pub version_count: usize,
    pub active_version_id: VersionId,
}

/// One version in a unit's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionHistoryEntry {
    pub version_id: VersionId,
    pub version: SemanticVersion,
    pub is_active: bool,
    pub deployed_at: DateTime<Utc>,
    pub process_instance_count: u64,
    pub can_rollback: bool,
}

impl VersionHistoryEntry {
    pub fn new(version: &FunctionUnitVersion, process_instance_count: u64) -> Self {
        Self {
            version_id: version.id,
            version: version.version,
            is_active: version.is_active,
            deployed_at: version.deployed_at,
            process_instance_count,
            can_rollback: !version.is_active,
        }
    }
}

/// Full history of a unit, highest version first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionHistoryDisplay {
    pub name: String,
    pub versions: Vec<VersionHistoryEntry>,
}
