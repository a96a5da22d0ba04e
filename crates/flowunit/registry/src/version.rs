//! Version registry
//!
//! Tracks the versions of each function unit and owns the single-active rule:
//! activation always deactivates the siblings and activates the target inside
//! one unit of work, and the store refuses to commit any other outcome.

use crate::error::{RegistryError, Result};
use flowunit_storage::{UnitStore, UnitTransaction};
use flowunit_types::{
    validate_unit_name, ChangeType, FunctionUnitVersion, SemanticVersion, VersionId,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Version bookkeeping per function unit name
#[derive(Clone)]
pub struct VersionRegistry {
    store: Arc<dyn UnitStore>,
}

fn next_from(versions: &[FunctionUnitVersion], change: ChangeType) -> Result<SemanticVersion> {
    match versions.iter().map(|v| v.version).max() {
        Some(highest) => Ok(highest.bump(change)?),
        None => Ok(SemanticVersion::INITIAL),
    }
}

fn single_active(name: &str, versions: Vec<FunctionUnitVersion>) -> Result<FunctionUnitVersion> {
    let mut active: Vec<FunctionUnitVersion> = versions.into_iter().filter(|v| v.is_active).collect();
    match active.len() {
        0 => Err(RegistryError::NoActiveVersion(name.to_string())),
        1 => Ok(active.remove(0)),
        _ => Err(RegistryError::MultipleActiveVersions {
            name: name.to_string(),
            versions: active.iter().map(|v| v.version.to_string()).collect(),
        }),
    }
}

impl VersionRegistry {
    pub fn new(store: Arc<dyn UnitStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn UnitStore> {
        &self.store
    }

    /// Next version for `name`: `1.0.0` for a new unit, otherwise the highest
    /// existing version incremented by `change`.
    pub async fn generate_next_version(
        &self,
        name: &str,
        change: ChangeType,
    ) -> Result<SemanticVersion> {
        validate_unit_name(name)?;
        let versions = self.store.list_versions(name).await?;
        next_from(&versions, change)
    }

    /// String form of [`Self::generate_next_version`]; rejects unknown change types.
    pub async fn generate_next_version_str(
        &self,
        name: &str,
        change: &str,
    ) -> Result<SemanticVersion> {
        let change: ChangeType = change.parse()?;
        self.generate_next_version(name, change).await
    }

    pub async fn generate_next_version_in(
        &self,
        tx: &mut dyn UnitTransaction,
        name: &str,
        change: ChangeType,
    ) -> Result<SemanticVersion> {
        validate_unit_name(name)?;
        let versions = tx.list_versions(name).await?;
        next_from(&versions, change)
    }

    pub async fn version_exists(&self, name: &str, version: &SemanticVersion) -> Result<bool> {
        validate_unit_name(name)?;
        Ok(self.store.find_version(name, version).await?.is_some())
    }

    pub async fn version_exists_in(
        &self,
        tx: &mut dyn UnitTransaction,
        name: &str,
        version: &SemanticVersion,
    ) -> Result<bool> {
        validate_unit_name(name)?;
        let versions = tx.list_versions(name).await?;
        Ok(versions.iter().any(|v| v.version == *version))
    }

    pub async fn get_version(&self, id: VersionId) -> Result<FunctionUnitVersion> {
        self.store
            .get_version(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub async fn find_version(
        &self,
        name: &str,
        version: &SemanticVersion,
    ) -> Result<Option<FunctionUnitVersion>> {
        validate_unit_name(name)?;
        Ok(self.store.find_version(name, version).await?)
    }

    /// The unique active version of `name`.
    pub async fn get_active_version(&self, name: &str) -> Result<FunctionUnitVersion> {
        validate_unit_name(name)?;
        let versions = self.store.list_versions(name).await?;
        if versions.is_empty() {
            return Err(RegistryError::NotFound(format!("function unit {name}")));
        }
        single_active(name, versions)
    }

    /// Active version as seen by `tx`, or `None` for a unit with no versions yet.
    pub async fn get_active_version_in(
        &self,
        tx: &mut dyn UnitTransaction,
        name: &str,
    ) -> Result<Option<FunctionUnitVersion>> {
        validate_unit_name(name)?;
        let versions = tx.list_versions(name).await?;
        if versions.is_empty() {
            return Ok(None);
        }
        single_active(name, versions).map(Some)
    }

    /// Version-less lookup for callers that predate versioning: the active version.
    pub async fn get_function_unit(&self, name: &str) -> Result<FunctionUnitVersion> {
        self.get_active_version(name).await
    }

    /// All versions of `name`, highest semantic version first.
    pub async fn get_history(&self, name: &str) -> Result<Vec<FunctionUnitVersion>> {
        validate_unit_name(name)?;
        Ok(self.store.list_versions(name).await?)
    }

    /// Make `id` the only active version of its unit. Not retried on conflict.
    #[instrument(skip(self), fields(version_id = %id))]
    pub async fn activate_version(&self, id: VersionId) -> Result<FunctionUnitVersion> {
        let mut tx = self.store.begin().await?;
        let activated = self.activate_in(tx.as_mut(), id).await?;
        tx.commit().await?;
        info!(name = %activated.name, version = %activated.version, "Version activated");
        Ok(activated)
    }

    /// Deactivate every sibling of `id`, then activate `id`, inside `tx`.
    pub async fn activate_in(
        &self,
        tx: &mut dyn UnitTransaction,
        id: VersionId,
    ) -> Result<FunctionUnitVersion> {
        let target = tx
            .get_version(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        for sibling in tx.list_versions(&target.name).await? {
            if sibling.id != id && sibling.is_active {
                debug!(name = %sibling.name, version = %sibling.version, "Deactivating version");
                tx.set_active(sibling.id, false).await?;
            }
        }
        if !target.is_active {
            tx.set_active(id, true).await?;
        }

        tx.get_version(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Consistency check: exactly one active version of `name`.
    pub async fn validate_single_active(&self, name: &str) -> Result<FunctionUnitVersion> {
        validate_unit_name(name)?;
        let versions = self.store.list_versions(name).await?;
        single_active(name, versions)
    }
}
