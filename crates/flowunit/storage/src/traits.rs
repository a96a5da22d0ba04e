use crate::model::{NewDefinition, NewVersion};
use crate::StorageResult;
use async_trait::async_trait;
use flowunit_types::{
    AccessGrant, AccessRule, DefinitionSnapshot, FunctionUnitVersion, InstanceId, InstanceStatus,
    ProcessInstance, SemanticVersion, VersionId,
};

/// Committed-state reads plus the entry point for units of work.
///
/// Reads through this trait only ever observe committed transactions.
#[async_trait]
pub trait UnitStore: Send + Sync {
    /// Open a new unit of work. Dropping it without `commit` discards it.
    async fn begin(&self) -> StorageResult<Box<dyn UnitTransaction>>;

    async fn get_version(&self, id: VersionId) -> StorageResult<Option<FunctionUnitVersion>>;

    async fn find_version(
        &self,
        name: &str,
        version: &SemanticVersion,
    ) -> StorageResult<Option<FunctionUnitVersion>>;

    /// All versions of `name`, highest semantic version first.
    async fn list_versions(&self, name: &str) -> StorageResult<Vec<FunctionUnitVersion>>;

    /// Every version of every unit, ordered by name then semantic version descending.
    async fn list_all_versions(&self) -> StorageResult<Vec<FunctionUnitVersion>>;

    async fn get_definition(&self, version_id: VersionId)
        -> StorageResult<Option<DefinitionSnapshot>>;

    async fn list_grants(&self, version_id: VersionId) -> StorageResult<Vec<AccessGrant>>;

    async fn get_instance(&self, id: &InstanceId) -> StorageResult<Option<ProcessInstance>>;

    async fn count_instances(&self, version_id: VersionId) -> StorageResult<u64>;

    async fn list_instances(&self, version_id: VersionId) -> StorageResult<Vec<ProcessInstance>>;
}

/// A single unit of work against the store.
///
/// Reads see the transaction's own staged writes. Version rows and name scans
/// read here are validated again at commit; if another writer changed them
/// the commit fails with [`crate::StorageError::Conflict`].
#[async_trait]
pub trait UnitTransaction: Send {
    async fn get_version(&mut self, id: VersionId) -> StorageResult<Option<FunctionUnitVersion>>;

    /// All versions of `name`, highest first. Records the scan for commit validation.
    async fn list_versions(&mut self, name: &str) -> StorageResult<Vec<FunctionUnitVersion>>;

    /// Insert an inactive version row. Fails `Duplicate` on a `(name, version)` collision.
    async fn insert_version(&mut self, new: NewVersion) -> StorageResult<FunctionUnitVersion>;

    /// Flip the active flag and bump the row stamp.
    async fn set_active(&mut self, id: VersionId, active: bool) -> StorageResult<()>;

    /// Delete a version with its definition and grants. Restricted while instances remain.
    async fn delete_version(&mut self, id: VersionId) -> StorageResult<()>;

    async fn insert_definition(&mut self, new: NewDefinition) -> StorageResult<DefinitionSnapshot>;

    async fn list_grants(&mut self, version_id: VersionId) -> StorageResult<Vec<AccessGrant>>;

    /// Insert a batch of grants for one version, assigning fresh ids.
    async fn insert_grants(
        &mut self,
        version_id: VersionId,
        rules: Vec<AccessRule>,
    ) -> StorageResult<Vec<AccessGrant>>;

    async fn delete_grants(&mut self, version_id: VersionId) -> StorageResult<u64>;

    async fn count_instances(&mut self, version_id: VersionId) -> StorageResult<u64>;

    /// Fails `NotFound` if the referenced version does not exist.
    async fn insert_instance(&mut self, instance: ProcessInstance) -> StorageResult<()>;

    async fn update_instance_status(
        &mut self,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> StorageResult<()>;

    async fn delete_instance(&mut self, id: &InstanceId) -> StorageResult<()>;

    async fn delete_instances_for_version(&mut self, version_id: VersionId) -> StorageResult<u64>;

    async fn commit(&mut self) -> StorageResult<()>;

    async fn rollback(&mut self) -> StorageResult<()>;
}
