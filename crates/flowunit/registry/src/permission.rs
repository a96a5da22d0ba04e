//! Permission inheritance between versions
//!
//! Grants belong to exactly one version. A new version inherits by copy:
//! the rules are duplicated under fresh ids, so later edits on either side
//! never affect the other.

use crate::error::{RegistryError, Result};
use flowunit_storage::{UnitStore, UnitTransaction};
use flowunit_types::{AccessGrant, AccessRule, VersionId};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Copies and edits version access grants
#[derive(Clone)]
pub struct PermissionInheritance {
    store: Arc<dyn UnitStore>,
}

impl PermissionInheritance {
    pub fn new(store: Arc<dyn UnitStore>) -> Self {
        Self { store }
    }

    /// Copy every grant of `from` onto `to` inside `tx`, as one batch.
    pub async fn copy_in(
        &self,
        tx: &mut dyn UnitTransaction,
        from: VersionId,
        to: VersionId,
    ) -> Result<Vec<AccessGrant>> {
        let rules: Vec<AccessRule> = tx
            .list_grants(from)
            .await?
            .into_iter()
            .map(|grant| grant.rule)
            .collect();
        if rules.is_empty() {
            debug!(%from, %to, "No grants to inherit");
            return Ok(Vec::new());
        }
        let copied = tx.insert_grants(to, rules).await?;
        debug!(%from, %to, count = copied.len(), "Inherited grants");
        Ok(copied)
    }

    /// Standalone form of [`Self::copy_in`] in its own unit of work.
    #[instrument(skip(self))]
    pub async fn copy_permissions(&self, from: VersionId, to: VersionId) -> Result<Vec<AccessGrant>> {
        let mut tx = self.store.begin().await?;
        let copied = self.copy_in(tx.as_mut(), from, to).await?;
        tx.commit().await?;
        Ok(copied)
    }

    pub async fn grants(&self, version_id: VersionId) -> Result<Vec<AccessGrant>> {
        if self.store.get_version(version_id).await?.is_none() {
            return Err(RegistryError::NotFound(version_id.to_string()));
        }
        Ok(self.store.list_grants(version_id).await?)
    }

    /// Replace the grants of the active version. Inactive versions are read-only.
    #[instrument(skip(self, rules), fields(count = rules.len()))]
    pub async fn replace_grants(
        &self,
        version_id: VersionId,
        rules: Vec<AccessRule>,
    ) -> Result<Vec<AccessGrant>> {
        let mut tx = self.store.begin().await?;
        let version = tx
            .get_version(version_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(version_id.to_string()))?;
        if !version.is_active {
            return Err(RegistryError::GrantsNotEditable(version_id));
        }

        tx.delete_grants(version_id).await?;
        let grants = tx.insert_grants(version_id, rules).await?;
        tx.commit().await?;

        info!(name = %version.name, version = %version.version, "Grants replaced");
        Ok(grants)
    }
}
