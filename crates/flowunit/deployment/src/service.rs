//! Function unit service
//!
//! The inbound surface: deploy, inspect, activate, roll back and start
//! instances. Every state change is also broadcast as a [`UnitEventEnvelope`].

use crate::display::{FunctionUnitDisplay, VersionHistoryDisplay, VersionHistoryEntry};
use crate::error::{DeploymentError, Result};
use crate::orchestrator::{DeploymentOrchestrator, DeploymentOutcome};
use crate::retry::RetryPolicy;
use crate::rollback::{RollbackExecutor, RollbackImpact, RollbackOutcome, RollbackPlanner};
use flowunit_registry::{
    PermissionInheritance, ProcessBindingStore, RegistryError, StartInstance, VersionRegistry,
    WorkflowEngine,
};
use flowunit_storage::UnitStore;
use flowunit_types::{
    validate_unit_name, AccessGrant, AccessRule, ChangeType, FunctionUnitVersion,
    ProcessInstance, SemanticVersion, UnitEvent, UnitEventEnvelope, VersionId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{instrument, warn};

const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Answer to a rollback request: a preview when unconfirmed, the result otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackResponse {
    Preview(RollbackImpact),
    Executed(RollbackOutcome),
}

/// Entry point for function unit operations
#[derive(Clone)]
pub struct FunctionUnitService {
    registry: VersionRegistry,
    permissions: PermissionInheritance,
    bindings: ProcessBindingStore,
    orchestrator: DeploymentOrchestrator,
    planner: RollbackPlanner,
    executor: RollbackExecutor,
    event_tx: broadcast::Sender<UnitEventEnvelope>,
    actor: Option<String>,
}

impl FunctionUnitService {
    pub fn new(store: Arc<dyn UnitStore>, engine: Arc<dyn WorkflowEngine>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry: VersionRegistry::new(store.clone()),
            permissions: PermissionInheritance::new(store.clone()),
            bindings: ProcessBindingStore::new(store.clone(), engine.clone()),
            orchestrator: DeploymentOrchestrator::new(store.clone(), engine),
            planner: RollbackPlanner::new(store.clone()),
            executor: RollbackExecutor::new(store),
            event_tx,
            actor: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.orchestrator = self.orchestrator.with_retry_policy(retry);
        self
    }

    /// Attach an actor name to every emitted event
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<UnitEventEnvelope> {
        self.event_tx.subscribe()
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    fn emit(&self, event: UnitEvent) {
        let mut envelope = UnitEventEnvelope::new(event);
        if let Some(actor) = &self.actor {
            envelope = envelope.with_actor(actor.clone());
        }
        // No subscribers is not an error
        let _ = self.event_tx.send(envelope);
    }

    fn report_deploy(&self, name: &str, result: &Result<DeploymentOutcome>) {
        match result {
            Ok(outcome) => self.emit(UnitEvent::VersionDeployed {
                name: outcome.name.clone(),
                version_id: outcome.version_id,
                version: outcome.version,
                definition_key: outcome.definition_key.clone(),
                attempts: outcome.attempts,
            }),
            Err(err) => self.emit(UnitEvent::DeploymentFailed {
                name: name.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    pub async fn deploy(
        &self,
        name: &str,
        raw_definition: &str,
        change: ChangeType,
        metadata: serde_json::Value,
    ) -> Result<DeploymentOutcome> {
        let result = self
            .orchestrator
            .deploy(name, raw_definition, change, metadata)
            .await;
        self.report_deploy(name, &result);
        result
    }

    pub async fn deploy_explicit(
        &self,
        name: &str,
        raw_definition: &str,
        version: &str,
        metadata: serde_json::Value,
    ) -> Result<DeploymentOutcome> {
        let version = SemanticVersion::parse(version)?;
        let result = self
            .orchestrator
            .deploy_explicit(name, raw_definition, version, metadata)
            .await;
        self.report_deploy(name, &result);
        result
    }

    /// All versions of `name`, highest first
    pub async fn get_version_history(&self, name: &str) -> Result<Vec<FunctionUnitVersion>> {
        Ok(self.registry.get_history(name).await?)
    }

    pub async fn get_active_version(&self, name: &str) -> Result<FunctionUnitVersion> {
        Ok(self.registry.get_active_version(name).await?)
    }

    pub async fn activate_version(&self, id: VersionId) -> Result<FunctionUnitVersion> {
        let activated = self.registry.activate_version(id).await?;
        self.emit(UnitEvent::VersionActivated {
            name: activated.name.clone(),
            version_id: activated.id,
            version: activated.version,
        });
        Ok(activated)
    }

    /// Roll `name` back to `target_version`. Without confirmation only the
    /// impact is computed and nothing changes.
    #[instrument(skip(self))]
    pub async fn rollback(
        &self,
        name: &str,
        target_version: &str,
        confirmed: bool,
    ) -> Result<RollbackResponse> {
        validate_unit_name(name)?;
        let version = SemanticVersion::parse(target_version)?;
        let target = self
            .registry
            .find_version(name, &version)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("{name} {version}")))?;

        if !confirmed {
            let impact = self.planner.calculate_impact(target.id).await?;
            return Ok(RollbackResponse::Preview(impact));
        }

        let outcome = self.execute_rollback(target.id).await?;
        Ok(RollbackResponse::Executed(outcome))
    }

    pub async fn calculate_impact(&self, target: VersionId) -> Result<RollbackImpact> {
        self.planner.calculate_impact(target).await
    }

    pub async fn execute_rollback(&self, target: VersionId) -> Result<RollbackOutcome> {
        let outcome = self.executor.execute_rollback(target).await?;
        self.emit(UnitEvent::RolledBack {
            name: outcome.name.clone(),
            target_version: outcome.rolled_back_to,
            deleted_versions: outcome.deleted_versions.clone(),
            deleted_instances: outcome.deleted_instance_count,
        });
        Ok(outcome)
    }

    /// One row per unit that has exactly one active version, ordered by name.
    pub async fn list_for_display(&self) -> Result<Vec<FunctionUnitDisplay>> {
        let mut by_name: BTreeMap<String, Vec<FunctionUnitVersion>> = BTreeMap::new();
        for version in self.registry.store().list_all_versions().await? {
            by_name.entry(version.name.clone()).or_default().push(version);
        }

        let mut rows = Vec::with_capacity(by_name.len());
        for (name, versions) in by_name {
            let version_count = versions.len();
            let mut active = versions.into_iter().filter(|v| v.is_active);
            match (active.next(), active.next()) {
                (Some(current), None) => rows.push(FunctionUnitDisplay {
                    name,
                    current_version: current.version,
                    deployed_at: current.deployed_at,
                    version_count,
                    active_version_id: current.id,
                }),
                (None, _) => warn!(%name, "Skipping function unit without an active version"),
                (Some(_), Some(_)) => {
                    warn!(%name, "Skipping function unit with multiple active versions")
                }
            }
        }
        Ok(rows)
    }

    /// History of `name` with instance counts. Unknown names yield an empty list.
    pub async fn history_for_display(&self, name: &str) -> Result<VersionHistoryDisplay> {
        let versions = self.registry.get_history(name).await?;
        let mut entries = Vec::with_capacity(versions.len());
        for version in &versions {
            let count = self.bindings.count_by_version(version.id).await?;
            entries.push(VersionHistoryEntry::new(version, count));
        }
        Ok(VersionHistoryDisplay {
            name: name.to_string(),
            versions: entries,
        })
    }

    pub async fn create_instance(&self, request: StartInstance) -> Result<ProcessInstance> {
        let instance = self.bindings.create_instance(request).await?;
        self.emit(UnitEvent::InstanceStarted {
            name: instance.unit_name.clone(),
            instance_id: instance.id.clone(),
            version_id: instance.version_id,
        });
        Ok(instance)
    }

    pub fn bindings(&self) -> &ProcessBindingStore {
        &self.bindings
    }

    pub async fn grants(&self, version_id: VersionId) -> Result<Vec<AccessGrant>> {
        Ok(self.permissions.grants(version_id).await?)
    }

    pub async fn replace_grants(
        &self,
        version_id: VersionId,
        rules: Vec<AccessRule>,
    ) -> Result<Vec<AccessGrant>> {
        Ok(self.permissions.replace_grants(version_id, rules).await?)
    }

    /// Exactly one active version of `name`, or the violation.
    pub async fn check_consistency(&self, name: &str) -> Result<FunctionUnitVersion> {
        self.registry
            .validate_single_active(name)
            .await
            .map_err(DeploymentError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowunit_registry::InMemoryWorkflowEngine;
    use flowunit_storage::InMemoryUnitStore;
    use flowunit_types::EventSeverity;

    fn service() -> FunctionUnitService {
        FunctionUnitService::new(
            Arc::new(InMemoryUnitStore::new()),
            Arc::new(InMemoryWorkflowEngine::new()),
        )
        .with_retry_policy(RetryPolicy::linear(3, std::time::Duration::from_millis(1)))
        .with_actor("ops")
    }

    #[tokio::test]
    async fn test_deploy_emits_event() {
        let service = service();
        let mut events = service.subscribe();
        service
            .deploy("travel", "<definitions/>", ChangeType::Patch, serde_json::json!({}))
            .await
            .unwrap();

        let envelope = events.recv().await.unwrap();
        assert_eq!(envelope.actor.as_deref(), Some("ops"));
        assert_eq!(envelope.severity, EventSeverity::Info);
        assert!(matches!(
            envelope.event,
            UnitEvent::VersionDeployed { ref definition_key, .. } if definition_key == "travel_v1.0.0"
        ));
    }

    #[tokio::test]
    async fn test_unconfirmed_rollback_is_preview_only() {
        let service = service();
        service
            .deploy_explicit("travel", "<definitions/>", "1.0.0", serde_json::Value::Null)
            .await
            .unwrap();
        service
            .deploy_explicit("travel", "<definitions/>", "1.1.0", serde_json::Value::Null)
            .await
            .unwrap();

        let response = service.rollback("travel", "1.0.0", false).await.unwrap();
        let RollbackResponse::Preview(impact) = response else {
            panic!("expected preview");
        };
        assert_eq!(impact.versions_to_delete, vec![SemanticVersion::new(1, 1, 0)]);
        assert_eq!(service.get_version_history("travel").await.unwrap().len(), 2);
        assert_eq!(
            service.get_active_version("travel").await.unwrap().version,
            SemanticVersion::new(1, 1, 0)
        );
    }

    #[tokio::test]
    async fn test_rollback_to_unknown_version_is_not_found() {
        let service = service();
        service
            .deploy("travel", "<definitions/>", ChangeType::Minor, serde_json::Value::Null)
            .await
            .unwrap();
        let err = service.rollback("travel", "9.9.9", true).await.unwrap_err();
        assert!(err.is_not_found());

        let err = service.rollback("travel", "nine", true).await.unwrap_err();
        assert!(matches!(err, DeploymentError::Registry(RegistryError::Format(_))));
    }

    #[tokio::test]
    async fn test_display_views() {
        let service = service();
        service
            .deploy("b_unit", "<definitions/>", ChangeType::Minor, serde_json::Value::Null)
            .await
            .unwrap();
        service
            .deploy("a_unit", "<definitions/>", ChangeType::Minor, serde_json::Value::Null)
            .await
            .unwrap();
        service
            .deploy("a_unit", "<definitions/>", ChangeType::Minor, serde_json::Value::Null)
            .await
            .unwrap();

        let rows = service.list_for_display().await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a_unit", "b_unit"]);
        assert_eq!(rows[0].version_count, 2);
        assert_eq!(rows[0].current_version, SemanticVersion::new(1, 1, 0));

        service
            .create_instance(StartInstance::new("a_unit", "u-1"))
            .await
            .unwrap();
        let history = service.history_for_display("a_unit").await.unwrap();
        assert_eq!(history.versions.len(), 2);
        assert_eq!(history.versions[0].version, SemanticVersion::new(1, 1, 0));
        assert_eq!(history.versions[0].process_instance_count, 1);
        assert!(!history.versions[0].can_rollback);
        assert!(history.versions[1].can_rollback);

        let empty = service.history_for_display("nobody").await.unwrap();
        assert!(empty.versions.is_empty());
    }

    #[tokio::test]
    async fn test_failed_deploy_emits_error_event() {
        let engine = Arc::new(InMemoryWorkflowEngine::new());
        engine.set_fail_deploys(true);
        let service = FunctionUnitService::new(Arc::new(InMemoryUnitStore::new()), engine);
        let mut events = service.subscribe();

        assert!(service
            .deploy("travel", "<definitions/>", ChangeType::Minor, serde_json::Value::Null)
            .await
            .is_err());
        let envelope = events.recv().await.unwrap();
        assert_eq!(envelope.severity, EventSeverity::Error);
        assert!(matches!(envelope.event, UnitEvent::DeploymentFailed { .. }));
    }
}
