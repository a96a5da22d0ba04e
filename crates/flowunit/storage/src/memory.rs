//! In-memory reference implementation of the unit store.
//!
//! This adapter is deterministic and test-friendly. A transaction works on a
//! private copy of the committed tables and keeps a log of staged operations.
//! Commit validates what the transaction read, replays the log onto the latest
//! committed state off to the side and swaps the result in under one write
//! lock, so readers see either the old or the new state.

use crate::model::{NewDefinition, NewVersion};
use crate::traits::{UnitStore, UnitTransaction};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use flowunit_types::{
    AccessGrant, AccessRule, DefinitionSnapshot, FunctionUnitVersion, GrantId, InstanceId,
    InstanceStatus, ProcessInstance, SemanticVersion, VersionId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Tables {
    versions: BTreeMap<VersionId, FunctionUnitVersion>,
    definitions: HashMap<VersionId, DefinitionSnapshot>,
    grants: BTreeMap<GrantId, AccessGrant>,
    instances: BTreeMap<InstanceId, ProcessInstance>,
}

impl Tables {
    fn versions_named(&self, name: &str) -> Vec<FunctionUnitVersion> {
        let mut rows: Vec<_> = self
            .versions
            .values()
            .filter(|v| v.name == name)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.version.cmp(&a.version));
        rows
    }

    fn ids_named(&self, name: &str) -> BTreeSet<VersionId> {
        self.versions
            .values()
            .filter(|v| v.name == name)
            .map(|v| v.id)
            .collect()
    }

    fn find(&self, name: &str, version: &SemanticVersion) -> Option<&FunctionUnitVersion> {
        self.versions
            .values()
            .find(|v| v.name == name && v.version == *version)
    }

    fn grants_for(&self, version_id: VersionId) -> Vec<AccessGrant> {
        self.grants
            .values()
            .filter(|g| g.version_id == version_id)
            .cloned()
            .collect()
    }

    fn instances_for(&self, version_id: VersionId) -> Vec<ProcessInstance> {
        let mut rows: Vec<_> = self
            .instances
            .values()
            .filter(|i| i.version_id == version_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        rows
    }

    fn count_instances(&self, version_id: VersionId) -> u64 {
        self.instances
            .values()
            .filter(|i| i.version_id == version_id)
            .count() as u64
    }

    fn check_single_active(&self, name: &str) -> StorageResult<()> {
        let rows = self.versions_named(name);
        if rows.is_empty() {
            return Ok(());
        }
        let active: Vec<String> = rows
            .iter()
            .filter(|v| v.is_active)
            .map(|v| v.version.to_string())
            .collect();
        if active.len() != 1 {
            return Err(StorageError::InvariantViolation(format!(
                "function unit {} would have {} active versions {:?}",
                name,
                active.len(),
                active
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Op {
    InsertVersion(FunctionUnitVersion),
    SetActive { id: VersionId, active: bool },
    DeleteVersion(VersionId),
    InsertDefinition(DefinitionSnapshot),
    InsertGrants(Vec<AccessGrant>),
    DeleteGrants(Vec<GrantId>),
    InsertInstance(ProcessInstance),
    UpdateInstanceStatus { id: InstanceId, status: InstanceStatus },
    DeleteInstances(Vec<InstanceId>),
}

fn apply(tables: &mut Tables, op: Op) -> StorageResult<()> {
    match op {
        Op::InsertVersion(row) => {
            if tables.find(&row.name, &row.version).is_some() {
                return Err(StorageError::Duplicate(format!(
                    "{} {} already exists",
                    row.name, row.version
                )));
            }
            tables.versions.insert(row.id, row);
        }
        Op::SetActive { id, active } => {
            let row = tables
                .versions
                .get_mut(&id)
                .ok_or_else(|| StorageError::NotFound(format!("{} not found", id)))?;
            row.is_active = active;
            row.row_version += 1;
        }
        Op::DeleteVersion(id) => {
            if tables.instances.values().any(|i| i.version_id == id) {
                return Err(StorageError::Conflict(format!(
                    "{} is still referenced by process instances",
                    id
                )));
            }
            if tables.versions.remove(&id).is_none() {
                return Err(StorageError::NotFound(format!("{} not found", id)));
            }
            tables.definitions.remove(&id);
            tables.grants.retain(|_, g| g.version_id != id);
        }
        Op::InsertDefinition(definition) => {
            if !tables.versions.contains_key(&definition.version_id) {
                return Err(StorageError::NotFound(format!(
                    "{} not found",
                    definition.version_id
                )));
            }
            if tables.definitions.contains_key(&definition.version_id) {
                return Err(StorageError::Duplicate(format!(
                    "definition for {} already exists",
                    definition.version_id
                )));
            }
            tables.definitions.insert(definition.version_id, definition);
        }
        Op::InsertGrants(grants) => {
            for grant in grants {
                if !tables.versions.contains_key(&grant.version_id) {
                    return Err(StorageError::NotFound(format!(
                        "{} not found",
                        grant.version_id
                    )));
                }
                tables.grants.insert(grant.id, grant);
            }
        }
        Op::DeleteGrants(ids) => {
            for id in ids {
                tables.grants.remove(&id);
            }
        }
        Op::InsertInstance(instance) => {
            if !tables.versions.contains_key(&instance.version_id) {
                return Err(StorageError::NotFound(format!(
                    "{} no longer exists",
                    instance.version_id
                )));
            }
            if tables.instances.contains_key(&instance.id) {
                return Err(StorageError::Duplicate(format!(
                    "{} already exists",
                    instance.id
                )));
            }
            tables.instances.insert(instance.id.clone(), instance);
        }
        Op::UpdateInstanceStatus { id, status } => {
            let row = tables
                .instances
                .get_mut(&id)
                .ok_or_else(|| StorageError::NotFound(format!("{} not found", id)))?;
            row.status = status;
        }
        Op::DeleteInstances(ids) => {
            for id in ids {
                tables.instances.remove(&id);
            }
        }
    }
    Ok(())
}

struct Shared {
    tables: RwLock<Arc<Tables>>,
    next_version_id: AtomicI64,
    next_grant_id: AtomicI64,
}

fn poisoned() -> StorageError {
    StorageError::Backend("unit store lock poisoned".to_string())
}

/// In-memory unit store.
#[derive(Clone)]
pub struct InMemoryUnitStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryUnitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUnitStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Arc::new(Tables::default())),
                next_version_id: AtomicI64::new(1),
                next_grant_id: AtomicI64::new(1),
            }),
        }
    }

    fn snapshot(&self) -> StorageResult<Arc<Tables>> {
        let guard = self.shared.tables.read().map_err(|_| poisoned())?;
        Ok(Arc::clone(&guard))
    }
}

#[async_trait]
impl UnitStore for InMemoryUnitStore {
    async fn begin(&self) -> StorageResult<Box<dyn UnitTransaction>> {
        let base = self.snapshot()?;
        Ok(Box::new(InMemoryUnitTransaction {
            shared: Arc::clone(&self.shared),
            working: (*base).clone(),
            base,
            ops: Vec::new(),
            read_stamps: HashMap::new(),
            scanned_names: HashMap::new(),
            touched_names: BTreeSet::new(),
            finished: false,
        }))
    }

    async fn get_version(&self, id: VersionId) -> StorageResult<Option<FunctionUnitVersion>> {
        Ok(self.snapshot()?.versions.get(&id).cloned())
    }

    async fn find_version(
        &self,
        name: &str,
        version: &SemanticVersion,
    ) -> StorageResult<Option<FunctionUnitVersion>> {
        Ok(self.snapshot()?.find(name, version).cloned())
    }

    async fn list_versions(&self, name: &str) -> StorageResult<Vec<FunctionUnitVersion>> {
        Ok(self.snapshot()?.versions_named(name))
    }

    async fn list_all_versions(&self) -> StorageResult<Vec<FunctionUnitVersion>> {
        let tables = self.snapshot()?;
        let mut rows: Vec<_> = tables.versions.values().cloned().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| b.version.cmp(&a.version)));
        Ok(rows)
    }

    async fn get_definition(
        &self,
        version_id: VersionId,
    ) -> StorageResult<Option<DefinitionSnapshot>> {
        Ok(self.snapshot()?.definitions.get(&version_id).cloned())
    }

    async fn list_grants(&self, version_id: VersionId) -> StorageResult<Vec<AccessGrant>> {
        Ok(self.snapshot()?.grants_for(version_id))
    }

    async fn get_instance(&self, id: &InstanceId) -> StorageResult<Option<ProcessInstance>> {
        Ok(self.snapshot()?.instances.get(id).cloned())
    }

    async fn count_instances(&self, version_id: VersionId) -> StorageResult<u64> {
        Ok(self.snapshot()?.count_instances(version_id))
    }

    async fn list_instances(&self, version_id: VersionId) -> StorageResult<Vec<ProcessInstance>> {
        Ok(self.snapshot()?.instances_for(version_id))
    }
}

/// Unit of work against [`InMemoryUnitStore`].
pub struct InMemoryUnitTransaction {
    shared: Arc<Shared>,
    base: Arc<Tables>,
    working: Tables,
    ops: Vec<Op>,
    /// Row stamps as of `base` for every pre-existing version row this transaction used
    read_stamps: HashMap<VersionId, u64>,
    /// Version ids per name as of `base` for every name this transaction scanned
    scanned_names: HashMap<String, BTreeSet<VersionId>>,
    touched_names: BTreeSet<String>,
    finished: bool,
}

impl InMemoryUnitTransaction {
    fn ensure_open(&self) -> StorageResult<()> {
        if self.finished {
            return Err(StorageError::Backend(
                "transaction already finished".to_string(),
            ));
        }
        Ok(())
    }

    fn stamp(&mut self, id: VersionId) {
        if self.read_stamps.contains_key(&id) {
            return;
        }
        if let Some(row) = self.base.versions.get(&id) {
            self.read_stamps.insert(id, row.row_version);
        }
    }

    fn stage(&mut self, op: Op) -> StorageResult<()> {
        apply(&mut self.working, op.clone())?;
        self.ops.push(op);
        Ok(())
    }

    fn working_version(&mut self, id: VersionId) -> StorageResult<FunctionUnitVersion> {
        self.stamp(id);
        self.working
            .versions
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{} not found", id)))
    }

    fn commit_sync(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        self.finished = true;

        let mut guard = self.shared.tables.write().map_err(|_| poisoned())?;
        let live = Arc::clone(&guard);

        for (id, stamp) in &self.read_stamps {
            match live.versions.get(id) {
                Some(row) if row.row_version == *stamp => {}
                Some(_) => {
                    return Err(StorageError::Conflict(format!(
                        "{} was modified concurrently",
                        id
                    )))
                }
                None => {
                    return Err(StorageError::Conflict(format!(
                        "{} was deleted concurrently",
                        id
                    )))
                }
            }
        }
        for (name, ids) in &self.scanned_names {
            if live.ids_named(name) != *ids {
                return Err(StorageError::Conflict(format!(
                    "versions of {} changed concurrently",
                    name
                )));
            }
        }

        let mut next = (*live).clone();
        let op_count = self.ops.len();
        for op in self.ops.drain(..) {
            apply(&mut next, op).map_err(|e| match e {
                StorageError::Duplicate(msg) => StorageError::Conflict(msg),
                other => other,
            })?;
        }
        for name in &self.touched_names {
            next.check_single_active(name)?;
        }

        *guard = Arc::new(next);
        debug!(ops = op_count, names = ?self.touched_names, "committed unit transaction");
        Ok(())
    }
}

#[async_trait]
impl UnitTransaction for InMemoryUnitTransaction {
    async fn get_version(&mut self, id: VersionId) -> StorageResult<Option<FunctionUnitVersion>> {
        self.ensure_open()?;
        self.stamp(id);
        Ok(self.working.versions.get(&id).cloned())
    }

    async fn list_versions(&mut self, name: &str) -> StorageResult<Vec<FunctionUnitVersion>> {
        self.ensure_open()?;
        if !self.scanned_names.contains_key(name) {
            let ids = self.base.ids_named(name);
            self.scanned_names.insert(name.to_string(), ids);
        }
        Ok(self.working.versions_named(name))
    }

    async fn insert_version(&mut self, new: NewVersion) -> StorageResult<FunctionUnitVersion> {
        self.ensure_open()?;
        if self.working.find(&new.name, &new.version).is_some() {
            return Err(StorageError::Duplicate(format!(
                "{} {} already exists",
                new.name, new.version
            )));
        }
        let id = VersionId::new(self.shared.next_version_id.fetch_add(1, Ordering::SeqCst));
        let row = FunctionUnitVersion {
            id,
            name: new.name,
            version: new.version,
            is_active: false,
            deployed_at: new.deployed_at,
            previous_version: new.previous_version,
            metadata: new.metadata,
            row_version: 1,
        };
        self.touched_names.insert(row.name.clone());
        self.stage(Op::InsertVersion(row.clone()))?;
        Ok(row)
    }

    async fn set_active(&mut self, id: VersionId, active: bool) -> StorageResult<()> {
        self.ensure_open()?;
        let row = self.working_version(id)?;
        self.touched_names.insert(row.name);
        self.stage(Op::SetActive { id, active })
    }

    async fn delete_version(&mut self, id: VersionId) -> StorageResult<()> {
        self.ensure_open()?;
        let row = self.working_version(id)?;
        self.touched_names.insert(row.name);
        self.stage(Op::DeleteVersion(id))
    }

    async fn insert_definition(&mut self, new: NewDefinition) -> StorageResult<DefinitionSnapshot> {
        self.ensure_open()?;
        self.working_version(new.version_id)?;
        let snapshot = DefinitionSnapshot {
            version_id: new.version_id,
            definition_key: new.definition_key,
            raw_definition: new.raw_definition,
            created_at: Utc::now(),
        };
        self.stage(Op::InsertDefinition(snapshot.clone()))?;
        Ok(snapshot)
    }

    async fn list_grants(&mut self, version_id: VersionId) -> StorageResult<Vec<AccessGrant>> {
        self.ensure_open()?;
        self.stamp(version_id);
        Ok(self.working.grants_for(version_id))
    }

    async fn insert_grants(
        &mut self,
        version_id: VersionId,
        rules: Vec<AccessRule>,
    ) -> StorageResult<Vec<AccessGrant>> {
        self.ensure_open()?;
        self.working_version(version_id)?;
        let grants: Vec<AccessGrant> = rules
            .into_iter()
            .map(|rule| AccessGrant {
                id: GrantId::new(self.shared.next_grant_id.fetch_add(1, Ordering::SeqCst)),
                version_id,
                rule,
            })
            .collect();
        self.stage(Op::InsertGrants(grants.clone()))?;
        Ok(grants)
    }

    async fn delete_grants(&mut self, version_id: VersionId) -> StorageResult<u64> {
        self.ensure_open()?;
        self.working_version(version_id)?;
        let ids: Vec<GrantId> = self
            .working
            .grants_for(version_id)
            .into_iter()
            .map(|g| g.id)
            .collect();
        let count = ids.len() as u64;
        self.stage(Op::DeleteGrants(ids))?;
        Ok(count)
    }

    async fn count_instances(&mut self, version_id: VersionId) -> StorageResult<u64> {
        self.ensure_open()?;
        Ok(self.working.count_instances(version_id))
    }

    async fn insert_instance(&mut self, instance: ProcessInstance) -> StorageResult<()> {
        self.ensure_open()?;
        self.stage(Op::InsertInstance(instance))
    }

    async fn update_instance_status(
        &mut self,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> StorageResult<()> {
        self.ensure_open()?;
        self.stage(Op::UpdateInstanceStatus {
            id: id.clone(),
            status,
        })
    }

    async fn delete_instance(&mut self, id: &InstanceId) -> StorageResult<()> {
        self.ensure_open()?;
        if !self.working.instances.contains_key(id) {
            return Err(StorageError::NotFound(format!("{} not found", id)));
        }
        self.stage(Op::DeleteInstances(vec![id.clone()]))
    }

    async fn delete_instances_for_version(&mut self, version_id: VersionId) -> StorageResult<u64> {
        self.ensure_open()?;
        let ids: Vec<InstanceId> = self
            .working
            .instances_for(version_id)
            .into_iter()
            .map(|i| i.id)
            .collect();
        let count = ids.len() as u64;
        self.stage(Op::DeleteInstances(ids))?;
        Ok(count)
    }

    async fn commit(&mut self) -> StorageResult<()> {
        self.commit_sync()
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        self.finished = true;
        self.ops.clear();
        Ok(())
    }
}
