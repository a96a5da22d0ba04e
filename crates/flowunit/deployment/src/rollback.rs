//! Destructive rollback
//!
//! Rolling back to a version deletes every sibling with a greater semantic
//! version, and the process instances bound to them, before reactivating the
//! target. Ordering is semantic only; deployment timestamps and the
//! `previous_version` link play no part.

use crate::error::{DeploymentError, Result};
use flowunit_registry::VersionRegistry;
use flowunit_storage::{UnitStore, UnitTransaction};
use flowunit_types::{FunctionUnitVersion, SemanticVersion, VersionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Confirmation text shown before a rollback is executed.
pub fn rollback_warning(versions: usize, instances: u64) -> String {
    format!(
        "WARNING: This rollback operation will DELETE {versions} version(s) and {instances} process instance(s). \
         This action is IRREVERSIBLE. Please confirm you want to proceed."
    )
}

/// What a rollback would delete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackImpact {
    pub target_version_id: VersionId,
    pub name: String,
    pub target_version: SemanticVersion,
    /// Ascending semantic order
    pub versions_to_delete: Vec<SemanticVersion>,
    pub version_ids_to_delete: Vec<VersionId>,
    pub total_instances_to_delete: u64,
    pub warning_message: String,
    pub can_proceed: bool,
}

/// Result of an executed rollback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub success: bool,
    pub name: String,
    pub rolled_back_to: SemanticVersion,
    pub target_version_id: VersionId,
    pub deleted_versions: Vec<SemanticVersion>,
    pub deleted_instance_count: u64,
}

fn newer_than(target: &FunctionUnitVersion, siblings: Vec<FunctionUnitVersion>) -> Vec<FunctionUnitVersion> {
    let mut newer: Vec<FunctionUnitVersion> = siblings
        .into_iter()
        .filter(|v| v.id != target.id && v.version > target.version)
        .collect();
    newer.sort_by(|a, b| a.version.cmp(&b.version));
    newer
}

/// Read-only impact analysis
#[derive(Clone)]
pub struct RollbackPlanner {
    store: Arc<dyn UnitStore>,
}

impl RollbackPlanner {
    pub fn new(store: Arc<dyn UnitStore>) -> Self {
        Self { store }
    }

    /// Compute what rolling back to `target` would delete. Fails
    /// `InvalidRollback` if the target is missing or already active.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn calculate_impact(&self, target: VersionId) -> Result<RollbackImpact> {
        let version = self
            .store
            .get_version(target)
            .await?
            .ok_or_else(|| DeploymentError::InvalidRollback(format!("{target} not found")))?;
        if version.is_active {
            return Err(DeploymentError::InvalidRollback(format!(
                "{} {} is already the active version",
                version.name, version.version
            )));
        }

        let newer = newer_than(&version, self.store.list_versions(&version.name).await?);
        let mut total_instances = 0;
        for doomed in &newer {
            let count = self.store.count_instances(doomed.id).await?;
            debug!(version = %doomed.version, instances = count, "Version would be deleted");
            total_instances += count;
        }

        Ok(RollbackImpact {
            target_version_id: version.id,
            name: version.name,
            target_version: version.version,
            warning_message: rollback_warning(newer.len(), total_instances),
            versions_to_delete: newer.iter().map(|v| v.version).collect(),
            version_ids_to_delete: newer.iter().map(|v| v.id).collect(),
            total_instances_to_delete: total_instances,
            can_proceed: true,
        })
    }
}

/// Executes rollbacks in a single transaction. Never retried.
#[derive(Clone)]
pub struct RollbackExecutor {
    store: Arc<dyn UnitStore>,
    planner: RollbackPlanner,
    registry: VersionRegistry,
}

impl RollbackExecutor {
    pub fn new(store: Arc<dyn UnitStore>) -> Self {
        Self {
            planner: RollbackPlanner::new(store.clone()),
            registry: VersionRegistry::new(store.clone()),
            store,
        }
    }

    #[instrument(skip(self), fields(target = %target))]
    pub async fn execute_rollback(&self, target: VersionId) -> Result<RollbackOutcome> {
        let impact = self.planner.calculate_impact(target).await?;
        warn!(
            name = %impact.name,
            target_version = %impact.target_version,
            versions = impact.versions_to_delete.len(),
            instances = impact.total_instances_to_delete,
            "Executing destructive rollback"
        );

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|err| DeploymentError::transaction_failed("rollback", err.into()))?;
        let staged = self.stage(tx.as_mut(), target).await;
        let result = match staged {
            Ok(outcome) => tx.commit().await.map(|()| outcome).map_err(DeploymentError::from),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    debug!(error = %rollback_err, "Discarding failed rollback transaction");
                }
                Err(err)
            }
        };

        match result {
            Ok(outcome) => {
                info!(
                    name = %outcome.name,
                    version = %outcome.rolled_back_to,
                    deleted_versions = outcome.deleted_versions.len(),
                    deleted_instances = outcome.deleted_instance_count,
                    "Rolled back"
                );
                Ok(outcome)
            }
            Err(err @ DeploymentError::InvalidRollback(_)) => {
                warn!(error = %err, "Rollback rejected, previous state kept");
                Err(err)
            }
            Err(err) => {
                error!(error = %err, "Rollback aborted, previous state kept");
                Err(DeploymentError::transaction_failed("rollback", err))
            }
        }
    }

    async fn stage(&self, tx: &mut dyn UnitTransaction, target: VersionId) -> Result<RollbackOutcome> {
        let version = tx
            .get_version(target)
            .await?
            .ok_or_else(|| DeploymentError::InvalidRollback(format!("{target} not found")))?;
        // Activated by another writer since the impact was calculated
        if version.is_active {
            return Err(DeploymentError::InvalidRollback(format!(
                "{} {} is already the active version",
                version.name, version.version
            )));
        }
        let newer = newer_than(&version, tx.list_versions(&version.name).await?);

        let mut deleted_instances = 0;
        for doomed in &newer {
            deleted_instances += tx.delete_instances_for_version(doomed.id).await?;
        }
        for doomed in &newer {
            tx.delete_version(doomed.id).await?;
            debug!(version = %doomed.version, "Version deleted");
        }

        let activated = self.registry.activate_in(tx, target).await?;
        Ok(RollbackOutcome {
            success: true,
            name: activated.name,
            rolled_back_to: activated.version,
            target_version_id: activated.id,
            deleted_versions: newer.iter().map(|v| v.version).collect(),
            deleted_instance_count: deleted_instances,
        })
    }
}
