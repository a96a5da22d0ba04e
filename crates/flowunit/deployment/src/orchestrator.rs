//! Deployment orchestration
//!
//! One deployment is one unit of work. The new version is recorded inactive,
//! handed to the workflow engine, snapshotted and given its predecessor's
//! grants before activation flips it live as the final write.

use crate::error::{DeploymentError, Result};
use crate::retry::{RetryError, RetryPolicy};
use chrono::{DateTime, Utc};
use flowunit_registry::{EngineError, PermissionInheritance, VersionRegistry, WorkflowEngine};
use flowunit_storage::{NewDefinition, NewVersion, UnitStore, UnitTransaction};
use flowunit_types::{
    definition_key, validate_definition, validate_unit_name, ChangeType, SemanticVersion,
    VersionId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Result of a committed deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub version_id: VersionId,
    pub name: String,
    pub version: SemanticVersion,
    pub definition_key: String,
    pub deployed_at: DateTime<Utc>,
    /// Version that was active before this deployment, if any
    pub previous_version: Option<VersionId>,
    pub inherited_grants: usize,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
enum VersionSelector {
    Next(ChangeType),
    Explicit(SemanticVersion),
}

/// Runs deployments with conflict retry
#[derive(Clone)]
pub struct DeploymentOrchestrator {
    store: Arc<dyn UnitStore>,
    registry: VersionRegistry,
    permissions: PermissionInheritance,
    engine: Arc<dyn WorkflowEngine>,
    retry: RetryPolicy,
}

impl DeploymentOrchestrator {
    pub fn new(store: Arc<dyn UnitStore>, engine: Arc<dyn WorkflowEngine>) -> Self {
        Self {
            registry: VersionRegistry::new(store.clone()),
            permissions: PermissionInheritance::new(store.clone()),
            store,
            engine,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Deploy `raw_definition` as the next version of `name`, bumped by `change`.
    #[instrument(skip(self, raw_definition, metadata), fields(change = %change))]
    pub async fn deploy(
        &self,
        name: &str,
        raw_definition: &str,
        change: ChangeType,
        metadata: serde_json::Value,
    ) -> Result<DeploymentOutcome> {
        self.run(name, raw_definition, VersionSelector::Next(change), metadata)
            .await
    }

    /// Deploy under a caller-chosen version. A collision is reported, never retried.
    #[instrument(skip(self, raw_definition, metadata), fields(version = %version))]
    pub async fn deploy_explicit(
        &self,
        name: &str,
        raw_definition: &str,
        version: SemanticVersion,
        metadata: serde_json::Value,
    ) -> Result<DeploymentOutcome> {
        self.run(name, raw_definition, VersionSelector::Explicit(version), metadata)
            .await
    }

    async fn run(
        &self,
        name: &str,
        raw_definition: &str,
        selector: VersionSelector,
        metadata: serde_json::Value,
    ) -> Result<DeploymentOutcome> {
        validate_unit_name(name)?;
        validate_definition(raw_definition)?;

        let result = self
            .retry
            .run(
                "deploy",
                |attempt| self.deploy_once(name, raw_definition, selector, metadata.clone(), attempt),
                DeploymentError::is_conflict,
            )
            .await;

        match result {
            Ok((outcome, attempts)) => {
                info!(
                    name,
                    version = %outcome.version,
                    version_id = %outcome.version_id,
                    attempts,
                    "Function unit deployed"
                );
                Ok(DeploymentOutcome { attempts, ..outcome })
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(name, attempts, error = %last, "Deployment gave up after conflicts");
                Err(DeploymentError::transaction_failed("deploy", last))
            }
            Err(RetryError::Aborted(err)) => {
                error!(name, error = %err, "Deployment aborted");
                Err(err)
            }
        }
    }

    async fn deploy_once(
        &self,
        name: &str,
        raw_definition: &str,
        selector: VersionSelector,
        metadata: serde_json::Value,
        attempt: u32,
    ) -> Result<DeploymentOutcome> {
        let mut tx = self.store.begin().await?;
        let outcome = self
            .stage(tx.as_mut(), name, raw_definition, selector, metadata, attempt)
            .await;
        match outcome {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    debug!(error = %rollback_err, "Rollback after failed deployment attempt");
                }
                Err(err)
            }
        }
    }

    async fn stage(
        &self,
        tx: &mut dyn UnitTransaction,
        name: &str,
        raw_definition: &str,
        selector: VersionSelector,
        metadata: serde_json::Value,
        attempt: u32,
    ) -> Result<DeploymentOutcome> {
        let version = match selector {
            VersionSelector::Next(change) => {
                self.registry.generate_next_version_in(tx, name, change).await?
            }
            VersionSelector::Explicit(version) => version,
        };
        if self.registry.version_exists_in(tx, name, &version).await? {
            return Err(DeploymentError::DuplicateVersion {
                name: name.to_string(),
                version,
            });
        }

        let previous = self.registry.get_active_version_in(tx, name).await?;
        let previous_id = previous.as_ref().map(|v| v.id);
        debug!(
            attempt,
            %version,
            previous = ?previous.as_ref().map(|v| v.version.to_string()),
            "Staging deployment"
        );

        let row = tx
            .insert_version(NewVersion {
                name: name.to_string(),
                version,
                previous_version: previous_id,
                metadata,
                deployed_at: Utc::now(),
            })
            .await
            .map_err(|err| match err {
                flowunit_storage::StorageError::Duplicate(_) => DeploymentError::DuplicateVersion {
                    name: name.to_string(),
                    version,
                },
                other => other.into(),
            })?;

        let key = definition_key(name, &version);
        let display_name = format!("{name} (v{version})");
        match self.engine.deploy(&key, raw_definition, &display_name).await {
            Ok(Some(record)) => {
                debug!(deployment_id = %record.deployment_id, engine = self.engine.name(), "Engine accepted definition");
            }
            Ok(None) => {
                return Err(DeploymentError::DeploymentFailed {
                    definition_key: key.clone(),
                    source: EngineError::NoDeploymentRecord(key),
                })
            }
            Err(source) => {
                return Err(DeploymentError::DeploymentFailed {
                    definition_key: key,
                    source,
                })
            }
        }

        tx.insert_definition(NewDefinition {
            version_id: row.id,
            definition_key: key.clone(),
            raw_definition: raw_definition.to_string(),
        })
        .await?;

        let inherited = match previous_id {
            Some(from) => self
                .permissions
                .copy_in(tx, from, row.id)
                .await
                .map_err(|err| {
                    DeploymentError::transaction_failed("permission inheritance", err.into())
                })?
                .len(),
            None => 0,
        };

        let activated = self.registry.activate_in(tx, row.id).await?;

        Ok(DeploymentOutcome {
            version_id: activated.id,
            name: activated.name,
            version: activated.version,
            definition_key: key,
            deployed_at: activated.deployed_at,
            previous_version: previous_id,
            inherited_grants: inherited,
            attempts: attempt,
        })
    }
}
