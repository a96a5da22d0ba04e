//! Function unit records
//!
//! A function unit is a named workflow definition with its own version
//! history. Each version owns one definition snapshot and a set of access
//! grants; process instances reference exactly one version for their whole
//! lifetime.

use crate::ids::{GrantId, InstanceId, VersionId};
use crate::version::SemanticVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Key under which the workflow engine knows a version: `{name}_v{version}`
pub fn definition_key(name: &str, version: &SemanticVersion) -> String {
    format!("{}_v{}", name, version)
}

/// One version of a function unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionUnitVersion {
    pub id: VersionId,
    pub name: String,
    pub version: SemanticVersion,
    pub is_active: bool,
    pub deployed_at: DateTime<Utc>,

    /// Version that was active when this one was deployed. Lineage only.
    pub previous_version: Option<VersionId>,

    /// Free-form deploy metadata
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Optimistic concurrency stamp, bumped on every write to the row
    pub row_version: u64,
}

impl FunctionUnitVersion {
    pub fn definition_key(&self) -> String {
        definition_key(&self.name, &self.version)
    }
}

/// Raw deployable definition owned 1:1 by a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSnapshot {
    pub version_id: VersionId,
    pub definition_key: String,
    pub raw_definition: String,
    pub created_at: DateTime<Utc>,
}

/// What a grant allows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    Use,
    View,
    Manage,
}

/// Who a grant applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    User,
    Role,
    Department,
}

macro_rules! str_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($ty), other)),
                }
            }
        }
    };
}

str_enum!(AccessType { Use => "use", View => "view", Manage => "manage" });
str_enum!(TargetType { User => "user", Role => "role", Department => "department" });

/// The rule part of a grant, independent of which version owns it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessRule {
    pub access_type: AccessType,
    pub target_type: TargetType,
    pub target_id: String,
}

impl AccessRule {
    pub fn new(access_type: AccessType, target_type: TargetType, target_id: impl Into<String>) -> Self {
        Self {
            access_type,
            target_type,
            target_id: target_id.into(),
        }
    }
}

/// An access rule owned by exactly one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: GrantId,
    pub version_id: VersionId,
    pub rule: AccessRule,
}

/// Runtime status of a process instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    Running,
    Completed,
    Failed,
}

str_enum!(InstanceStatus { Running => "RUNNING", Completed => "COMPLETED", Failed => "FAILED" });

/// A runtime execution bound to the version active when it started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: InstanceId,
    pub version_id: VersionId,
    pub unit_name: String,
    pub definition_key: String,
    pub start_user_id: String,
    pub start_user_name: Option<String>,
    #[serde(default)]
    pub variables: serde_json::Value,
    pub status: InstanceStatus,
    pub started_at: DateTime<Utc>,
}
