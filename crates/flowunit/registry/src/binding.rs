//! Process binding
//!
//! A process instance is bound to the version that was active when it
//! started. The binding is written once and never rebound; redeploys and
//! rollbacks only ever delete instances, they do not move them.

use crate::engine::WorkflowEngine;
use crate::error::{RegistryError, Result};
use crate::version::VersionRegistry;
use chrono::Utc;
use flowunit_storage::UnitStore;
use flowunit_types::{
    validate_user_id, InstanceId, InstanceStatus, ProcessInstance, VersionId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Request to start a process instance of a function unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInstance {
    pub name: String,
    #[serde(default)]
    pub variables: serde_json::Value,
    pub start_user_id: String,
    #[serde(default)]
    pub start_user_name: Option<String>,
}

impl StartInstance {
    pub fn new(name: impl Into<String>, start_user_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: serde_json::json!({}),
            start_user_id: start_user_id.into(),
            start_user_name: None,
        }
    }

    pub fn with_variables(mut self, variables: serde_json::Value) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.start_user_name = Some(name.into());
        self
    }
}

/// Creates and queries process instances bound to versions
#[derive(Clone)]
pub struct ProcessBindingStore {
    store: Arc<dyn UnitStore>,
    engine: Arc<dyn WorkflowEngine>,
    registry: VersionRegistry,
}

impl ProcessBindingStore {
    pub fn new(store: Arc<dyn UnitStore>, engine: Arc<dyn WorkflowEngine>) -> Self {
        let registry = VersionRegistry::new(store.clone());
        Self {
            store,
            engine,
            registry,
        }
    }

    /// Start an execution of the active version of `request.name` and record
    /// the instance against that exact version.
    #[instrument(skip(self, request), fields(name = %request.name, user = %request.start_user_id))]
    pub async fn create_instance(&self, request: StartInstance) -> Result<ProcessInstance> {
        validate_user_id(&request.start_user_id)?;
        let active = self.registry.get_active_version(&request.name).await?;
        let definition_key = active.definition_key();

        let variables = if request.variables.is_null() {
            serde_json::json!({})
        } else {
            request.variables
        };

        let execution_id = self
            .engine
            .start_instance(&definition_key, &variables, &request.start_user_id)
            .await?;

        let instance = ProcessInstance {
            id: InstanceId::new(execution_id),
            version_id: active.id,
            unit_name: active.name.clone(),
            definition_key,
            start_user_id: request.start_user_id,
            start_user_name: request.start_user_name,
            variables,
            status: InstanceStatus::Running,
            started_at: Utc::now(),
        };

        let mut tx = self.store.begin().await?;
        let persisted = match tx.insert_instance(instance.clone()).await {
            Ok(()) => tx.commit().await,
            Err(err) => Err(err),
        };
        if let Err(err) = persisted {
            error!(
                execution_id = %instance.id,
                engine = self.engine.name(),
                error = %err,
                "Execution started but instance could not be recorded"
            );
            return Err(err.into());
        }

        info!(
            instance_id = %instance.id,
            version = %active.version,
            "Process instance started"
        );
        Ok(instance)
    }

    pub async fn get_instance(&self, id: &InstanceId) -> Result<ProcessInstance> {
        self.store
            .get_instance(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub async fn count_by_version(&self, version_id: VersionId) -> Result<u64> {
        Ok(self.store.count_instances(version_id).await?)
    }

    pub async fn list_by_version(&self, version_id: VersionId) -> Result<Vec<ProcessInstance>> {
        Ok(self.store.list_instances(version_id).await?)
    }

    pub async fn update_status(&self, id: &InstanceId, status: InstanceStatus) -> Result<()> {
        let mut tx = self.store.begin().await?;
        tx.update_instance_status(id, status).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Explicitly delete one instance, the only way its binding goes away
    /// outside of a rollback.
    #[instrument(skip(self))]
    pub async fn delete_instance(&self, id: &InstanceId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        tx.delete_instance(id).await?;
        tx.commit().await?;
        info!(instance_id = %id, "Process instance deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryWorkflowEngine;
    use flowunit_storage::{InMemoryUnitStore, NewVersion};
    use flowunit_types::ValidationError;

    struct Fixture {
        store: Arc<dyn UnitStore>,
        engine: Arc<InMemoryWorkflowEngine>,
        bindings: ProcessBindingStore,
        registry: VersionRegistry,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn UnitStore> = Arc::new(InMemoryUnitStore::new());
        let engine = Arc::new(InMemoryWorkflowEngine::new());
        Fixture {
            bindings: ProcessBindingStore::new(store.clone(), engine.clone()),
            registry: VersionRegistry::new(store.clone()),
            store,
            engine,
        }
    }

    async fn deploy(f: &Fixture, version: &str) -> VersionId {
        let version: flowunit_types::SemanticVersion = version.parse().unwrap();
        let key = flowunit_types::definition_key("leave", &version);
        f.engine.deploy(&key, "<definitions/>", &key).await.unwrap();
        let mut tx = f.store.begin().await.unwrap();
        let row = tx
            .insert_version(NewVersion {
                name: "leave".to_string(),
                version,
                previous_version: None,
                metadata: serde_json::Value::Null,
                deployed_at: Utc::now(),
            })
            .await
            .unwrap();
        f.registry.activate_in(tx.as_mut(), row.id).await.unwrap();
        tx.commit().await.unwrap();
        row.id
    }

    #[tokio::test]
    async fn test_instance_stays_bound_across_redeploy() {
        let f = fixture();
        let v1 = deploy(&f, "1.0.0").await;
        let first = f
            .bindings
            .create_instance(StartInstance::new("leave", "u-1").with_variables(serde_json::json!({"days": 3})))
            .await
            .unwrap();
        assert_eq!(first.version_id, v1);
        assert_eq!(first.definition_key, "leave_v1.0.0");
        assert_eq!(first.status, InstanceStatus::Running);

        let v2 = deploy(&f, "1.1.0").await;
        let second = f
            .bindings
            .create_instance(StartInstance::new("leave", "u-2"))
            .await
            .unwrap();
        assert_eq!(second.version_id, v2);

        let reloaded = f.bindings.get_instance(&first.id).await.unwrap();
        assert_eq!(reloaded.version_id, v1);
        assert_eq!(reloaded.definition_key, "leave_v1.0.0");
        assert_eq!(f.bindings.count_by_version(v1).await.unwrap(), 1);
        assert_eq!(f.bindings.list_by_version(v2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_requires_user_and_active_version() {
        let f = fixture();
        let err = f
            .bindings
            .create_instance(StartInstance::new("leave", "u-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));

        deploy(&f, "1.0.0").await;
        let err = f
            .bindings
            .create_instance(StartInstance::new("leave", " "))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput(ValidationError::EmptyUserId)));
        assert_eq!(f.engine.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_and_status_update() {
        let f = fixture();
        deploy(&f, "1.0.0").await;
        let instance = f
            .bindings
            .create_instance(StartInstance::new("leave", "u-1").with_user_name("Una"))
            .await
            .unwrap();

        f.bindings
            .update_status(&instance.id, InstanceStatus::Completed)
            .await
            .unwrap();
        assert_eq!(
            f.bindings.get_instance(&instance.id).await.unwrap().status,
            InstanceStatus::Completed
        );

        f.bindings.delete_instance(&instance.id).await.unwrap();
        assert!(matches!(
            f.bindings.get_instance(&instance.id).await.unwrap_err(),
            RegistryError::NotFound(_)
        ));
        assert!(matches!(
            f.bindings.delete_instance(&instance.id).await.unwrap_err(),
            RegistryError::NotFound(_)
        ));
    }
}
