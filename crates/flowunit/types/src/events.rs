//! Lifecycle events for function units
//!
//! Events are broadcast by the deployment service so that operators and
//! audit sinks can follow deploys, activations and rollbacks.

use crate::ids::{InstanceId, VersionId};
use crate::version::SemanticVersion;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping every function unit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event severity
    pub severity: EventSeverity,

    /// Actor who triggered the event
    pub actor: Option<String>,

    /// The actual event
    pub event: UnitEvent,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

/// Function unit events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UnitEvent {
    /// A new version was deployed and activated
    VersionDeployed {
        name: String,
        version_id: VersionId,
        version: SemanticVersion,
        definition_key: String,
        attempts: u32,
    },

    /// A deployment was aborted; nothing from it was kept
    DeploymentFailed { name: String, reason: String },

    /// The active version of a unit changed
    VersionActivated {
        name: String,
        version_id: VersionId,
        version: SemanticVersion,
    },

    /// Newer versions were deleted and an older one reactivated
    RolledBack {
        name: String,
        target_version: SemanticVersion,
        deleted_versions: Vec<SemanticVersion>,
        deleted_instances: u64,
    },

    /// A process instance was started against the active version
    InstanceStarted {
        name: String,
        instance_id: InstanceId,
        version_id: VersionId,
    },
}

impl UnitEvent {
    /// Unit name the event concerns
    pub fn unit_name(&self) -> &str {
        match self {
            UnitEvent::VersionDeployed { name, .. }
            | UnitEvent::DeploymentFailed { name, .. }
            | UnitEvent::VersionActivated { name, .. }
            | UnitEvent::RolledBack { name, .. }
            | UnitEvent::InstanceStarted { name, .. } => name,
        }
    }
}

impl UnitEventEnvelope {
    /// Create a new event envelope
    pub fn new(event: UnitEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            severity: Self::infer_severity(&event),
            actor: None,
            event,
        }
    }

    /// Create with actor
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    fn infer_severity(event: &UnitEvent) -> EventSeverity {
        match event {
            UnitEvent::DeploymentFailed { .. } => EventSeverity::Error,
            UnitEvent::RolledBack { .. } => EventSeverity::Warning,
            _ => EventSeverity::Info,
        }
    }
}
