//! Deployments abort cleanly when copying grants to the new version fails.

use async_trait::async_trait;
use flowunit_deployment::{DeploymentError, FunctionUnitService, RetryPolicy};
use flowunit_registry::{InMemoryWorkflowEngine, RegistryError};
use flowunit_storage::{
    InMemoryUnitStore, NewDefinition, NewVersion, StorageError, StorageResult, UnitStore,
    UnitTransaction,
};
use flowunit_types::{
    AccessGrant, AccessRule, AccessType, ChangeType, DefinitionSnapshot, FunctionUnitVersion,
    InstanceId, InstanceStatus, ProcessInstance, SemanticVersion, TargetType, VersionId,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Rejects grant inserts while `fail_grants` is set.
struct GrantFailingStore {
    inner: InMemoryUnitStore,
    fail_grants: Arc<AtomicBool>,
    commits: Arc<AtomicU32>,
}

impl GrantFailingStore {
    fn new() -> Self {
        Self {
            inner: InMemoryUnitStore::new(),
            fail_grants: Arc::new(AtomicBool::new(false)),
            commits: Arc::new(AtomicU32::new(0)),
        }
    }
}

struct GrantFailingTransaction {
    inner: Box<dyn UnitTransaction>,
    fail_grants: Arc<AtomicBool>,
    commits: Arc<AtomicU32>,
}

#[async_trait]
impl UnitStore for GrantFailingStore {
    async fn begin(&self) -> StorageResult<Box<dyn UnitTransaction>> {
        Ok(Box::new(GrantFailingTransaction {
            inner: self.inner.begin().await?,
            fail_grants: self.fail_grants.clone(),
            commits: self.commits.clone(),
        }))
    }

    async fn get_version(&self, id: VersionId) -> StorageResult<Option<FunctionUnitVersion>> {
        self.inner.get_version(id).await
    }

    async fn find_version(
        &self,
        name: &str,
        version: &SemanticVersion,
    ) -> StorageResult<Option<FunctionUnitVersion>> {
        self.inner.find_version(name, version).await
    }

    async fn list_versions(&self, name: &str) -> StorageResult<Vec<FunctionUnitVersion>> {
        self.inner.list_versions(name).await
    }

    async fn list_all_versions(&self) -> StorageResult<Vec<FunctionUnitVersion>> {
        self.inner.list_all_versions().await
    }

    async fn get_definition(&self, version_id: VersionId) -> StorageResult<Option<DefinitionSnapshot>> {
        self.inner.get_definition(version_id).await
    }

    async fn list_grants(&self, version_id: VersionId) -> StorageResult<Vec<AccessGrant>> {
        self.inner.list_grants(version_id).await
    }

    async fn get_instance(&self, id: &InstanceId) -> StorageResult<Option<ProcessInstance>> {
        self.inner.get_instance(id).await
    }

    async fn count_instances(&self, version_id: VersionId) -> StorageResult<u64> {
        self.inner.count_instances(version_id).await
    }

    async fn list_instances(&self, version_id: VersionId) -> StorageResult<Vec<ProcessInstance>> {
        self.inner.list_instances(version_id).await
    }
}

#[async_trait]
impl UnitTransaction for GrantFailingTransaction {
    async fn get_version(&mut self, id: VersionId) -> StorageResult<Option<FunctionUnitVersion>> {
        self.inner.get_version(id).await
    }

    async fn list_versions(&mut self, name: &str) -> StorageResult<Vec<FunctionUnitVersion>> {
        self.inner.list_versions(name).await
    }

    async fn insert_version(&mut self, new: NewVersion) -> StorageResult<FunctionUnitVersion> {
        self.inner.insert_version(new).await
    }

    async fn set_active(&mut self, id: VersionId, active: bool) -> StorageResult<()> {
        self.inner.set_active(id, active).await
    }

    async fn delete_version(&mut self, id: VersionId) -> StorageResult<()> {
        self.inner.delete_version(id).await
    }

    async fn insert_definition(&mut self, new: NewDefinition) -> StorageResult<DefinitionSnapshot> {
        self.inner.insert_definition(new).await
    }

    async fn list_grants(&mut self, version_id: VersionId) -> StorageResult<Vec<AccessGrant>> {
        self.inner.list_grants(version_id).await
    }

    async fn insert_grants(
        &mut self,
        version_id: VersionId,
        rules: Vec<AccessRule>,
    ) -> StorageResult<Vec<AccessGrant>> {
        if self.fail_grants.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(format!(
                "grant table unavailable for version {version_id}"
            )));
        }
        self.inner.insert_grants(version_id, rules).await
    }

    async fn delete_grants(&mut self, version_id: VersionId) -> StorageResult<u64> {
        self.inner.delete_grants(version_id).await
    }

    async fn count_instances(&mut self, version_id: VersionId) -> StorageResult<u64> {
        self.inner.count_instances(version_id).await
    }

    async fn insert_instance(&mut self, instance: ProcessInstance) -> StorageResult<()> {
        self.inner.insert_instance(instance).await
    }

    async fn update_instance_status(
        &mut self,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> StorageResult<()> {
        self.inner.update_instance_status(id, status).await
    }

    async fn delete_instance(&mut self, id: &InstanceId) -> StorageResult<()> {
        self.inner.delete_instance(id).await
    }

    async fn delete_instances_for_version(&mut self, version_id: VersionId) -> StorageResult<u64> {
        self.inner.delete_instances_for_version(version_id).await
    }

    async fn commit(&mut self) -> StorageResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        self.inner.rollback().await
    }
}

const DEFINITION: &str = "<definitions id=\"expense\"><process id=\"expense\"/></definitions>";

#[tokio::test]
async fn grant_copy_failure_aborts_the_deployment() {
    let store = Arc::new(GrantFailingStore::new());
    let engine = Arc::new(InMemoryWorkflowEngine::new());
    let service = FunctionUnitService::new(store.clone(), engine)
        .with_retry_policy(RetryPolicy::linear(3, Duration::from_millis(1)));

    let v1 = service
        .deploy_explicit("expense", DEFINITION, "1.0.0", serde_json::Value::Null)
        .await
        .unwrap()
        .version_id;
    service
        .replace_grants(
            v1,
            vec![
                AccessRule::new(AccessType::Use, TargetType::Role, "staff"),
                AccessRule::new(AccessType::Manage, TargetType::User, "controller"),
            ],
        )
        .await
        .unwrap();
    let grants_before = store.list_grants(v1).await.unwrap();

    store.fail_grants.store(true, Ordering::SeqCst);
    let commits_before = store.commits.load(Ordering::SeqCst);
    let err = service
        .deploy("expense", DEFINITION, ChangeType::Minor, serde_json::Value::Null)
        .await
        .unwrap_err();

    match &err {
        DeploymentError::TransactionFailed { operation, source } => {
            assert_eq!(operation, "permission inheritance");
            assert!(matches!(
                source.as_ref(),
                DeploymentError::Registry(RegistryError::Storage(StorageError::Backend(_)))
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_conflict());
    // Aborted before commit and not retried
    assert_eq!(store.commits.load(Ordering::SeqCst), commits_before);

    let versions = store.list_versions("expense").await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].id, v1);
    assert!(store
        .find_version("expense", &SemanticVersion::new(1, 1, 0))
        .await
        .unwrap()
        .is_none());
    for raw in 1..=10 {
        let id = VersionId::new(raw);
        if id != v1 {
            assert!(store.get_definition(id).await.unwrap().is_none());
            assert!(store.list_grants(id).await.unwrap().is_empty());
        }
    }
    assert_eq!(store.list_grants(v1).await.unwrap(), grants_before);
    assert_eq!(service.check_consistency("expense").await.unwrap().id, v1);

    store.fail_grants.store(false, Ordering::SeqCst);
    let v2 = service
        .deploy("expense", DEFINITION, ChangeType::Minor, serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(v2.version, SemanticVersion::new(1, 1, 0));
    assert_eq!(v2.inherited_grants, 2);
}

#[tokio::test]
async fn grant_copy_is_skipped_without_grants() {
    let store = Arc::new(GrantFailingStore::new());
    let service = FunctionUnitService::new(store.clone(), Arc::new(InMemoryWorkflowEngine::new()));
    service
        .deploy_explicit("expense", DEFINITION, "1.0.0", serde_json::Value::Null)
        .await
        .unwrap();

    store.fail_grants.store(true, Ordering::SeqCst);
    let outcome = service
        .deploy("expense", DEFINITION, ChangeType::Patch, serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(outcome.inherited_grants, 0);
    assert_eq!(service.check_consistency("expense").await.unwrap().id, outcome.version_id);
}
