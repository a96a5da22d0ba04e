//! PostgreSQL adapter for the unit store.
//!
//! Transactions run at REPEATABLE READ. Version rows carry a `row_version`
//! stamp that every update and delete checks, the `(name, semantic_version)`
//! pair is unique, and a partial unique index allows at most one active row
//! per name. Serialization failures and constraint races surface as
//! [`StorageError::Conflict`].

use crate::model::{NewDefinition, NewVersion};
use crate::traits::{UnitStore, UnitTransaction};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use flowunit_types::{
    AccessGrant, AccessRule, DefinitionSnapshot, FunctionUnitVersion, GrantId, InstanceId,
    InstanceStatus, ProcessInstance, SemanticVersion, VersionId,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const VERSION_COLUMNS: &str = "id, name, semantic_version, is_active, deployed_at, \
     previous_version_id, metadata, row_version";

const INSTANCE_COLUMNS: &str = "id, version_id, unit_name, definition_key, start_user_id, \
     start_user_name, variables, status, started_at";

/// PostgreSQL-backed unit store.
#[derive(Clone)]
pub struct PostgresUnitStore {
    pool: PgPool,
}

impl PostgresUnitStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS fu_versions (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                semantic_version TEXT NOT NULL,
                major BIGINT NOT NULL,
                minor BIGINT NOT NULL,
                patch BIGINT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT FALSE,
                deployed_at TIMESTAMPTZ NOT NULL,
                previous_version_id BIGINT,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                row_version BIGINT NOT NULL DEFAULT 1,
                CONSTRAINT fu_versions_name_version_key UNIQUE (name, semantic_version)
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS fu_versions_single_active
                ON fu_versions (name) WHERE is_active
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fu_definitions (
                version_id BIGINT PRIMARY KEY REFERENCES fu_versions(id) ON DELETE CASCADE,
                definition_key TEXT NOT NULL,
                raw_definition TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fu_access_grants (
                id BIGSERIAL PRIMARY KEY,
                version_id BIGINT NOT NULL REFERENCES fu_versions(id) ON DELETE CASCADE,
                access_type TEXT NOT NULL,
                target_type TEXT NOT NULL,
                target_id TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS fu_access_grants_version ON fu_access_grants (version_id)",
            r#"
            CREATE TABLE IF NOT EXISTS fu_process_instances (
                id TEXT PRIMARY KEY,
                version_id BIGINT NOT NULL REFERENCES fu_versions(id) ON DELETE RESTRICT,
                unit_name TEXT NOT NULL,
                definition_key TEXT NOT NULL,
                start_user_id TEXT NOT NULL,
                start_user_name TEXT,
                variables JSONB NOT NULL DEFAULT '{}'::jsonb,
                status TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS fu_process_instances_version ON fu_process_instances (version_id)",
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl UnitStore for PostgresUnitStore {
    async fn begin(&self) -> StorageResult<Box<dyn UnitTransaction>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Box::new(PgUnitTransaction {
            tx: Some(tx),
            read_stamps: HashMap::new(),
            touched_names: BTreeSet::new(),
        }))
    }

    async fn get_version(&self, id: VersionId) -> StorageResult<Option<FunctionUnitVersion>> {
        let row = sqlx::query(&format!("SELECT {VERSION_COLUMNS} FROM fu_versions WHERE id = $1"))
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(version_row_to_record).transpose()
    }

    async fn find_version(
        &self,
        name: &str,
        version: &SemanticVersion,
    ) -> StorageResult<Option<FunctionUnitVersion>> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM fu_versions WHERE name = $1 AND semantic_version = $2"
        ))
        .bind(name)
        .bind(version.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(version_row_to_record).transpose()
    }

    async fn list_versions(&self, name: &str) -> StorageResult<Vec<FunctionUnitVersion>> {
        let rows = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM fu_versions WHERE name = $1 \
             ORDER BY major DESC, minor DESC, patch DESC"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(version_row_to_record).collect()
    }

    async fn list_all_versions(&self) -> StorageResult<Vec<FunctionUnitVersion>> {
        let rows = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM fu_versions \
             ORDER BY name ASC, major DESC, minor DESC, patch DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(version_row_to_record).collect()
    }

    async fn get_definition(
        &self,
        version_id: VersionId,
    ) -> StorageResult<Option<DefinitionSnapshot>> {
        let row = sqlx::query(
            "SELECT version_id, definition_key, raw_definition, created_at \
             FROM fu_definitions WHERE version_id = $1",
        )
        .bind(version_id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(definition_row_to_record).transpose()
    }

    async fn list_grants(&self, version_id: VersionId) -> StorageResult<Vec<AccessGrant>> {
        let rows = sqlx::query(
            "SELECT id, version_id, access_type, target_type, target_id \
             FROM fu_access_grants WHERE version_id = $1 ORDER BY id",
        )
        .bind(version_id.value())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(grant_row_to_record).collect()
    }

    async fn get_instance(&self, id: &InstanceId) -> StorageResult<Option<ProcessInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM fu_process_instances WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(instance_row_to_record).transpose()
    }

    async fn count_instances(&self, version_id: VersionId) -> StorageResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM fu_process_instances WHERE version_id = $1")
                .bind(version_id.value())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }

    async fn list_instances(&self, version_id: VersionId) -> StorageResult<Vec<ProcessInstance>> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM fu_process_instances WHERE version_id = $1 \
             ORDER BY started_at ASC"
        ))
        .bind(version_id.value())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(instance_row_to_record).collect()
    }
}

/// Unit of work against [`PostgresUnitStore`]. Rolls back on drop unless committed.
pub struct PgUnitTransaction {
    tx: Option<Transaction<'static, Postgres>>,
    read_stamps: HashMap<VersionId, u64>,
    touched_names: BTreeSet<String>,
}

impl PgUnitTransaction {
    fn tx(&mut self) -> StorageResult<&mut Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| StorageError::Backend("transaction already finished".to_string()))
    }

    async fn fetch_version(&mut self, id: VersionId) -> StorageResult<Option<FunctionUnitVersion>> {
        let tx = self.tx()?;
        let row = sqlx::query(&format!("SELECT {VERSION_COLUMNS} FROM fu_versions WHERE id = $1"))
            .bind(id.value())
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        let record = row.map(version_row_to_record).transpose()?;
        if let Some(record) = &record {
            self.read_stamps.entry(id).or_insert(record.row_version);
        }
        Ok(record)
    }

    async fn require_version(&mut self, id: VersionId) -> StorageResult<FunctionUnitVersion> {
        self.fetch_version(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("{} not found", id)))
    }

    fn stamp_for(&self, record: &FunctionUnitVersion) -> u64 {
        self.read_stamps
            .get(&record.id)
            .copied()
            .unwrap_or(record.row_version)
    }

    async fn check_single_active(&mut self) -> StorageResult<()> {
        if self.touched_names.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = self.touched_names.iter().cloned().collect();
        let tx = self.tx()?;
        let rows = sqlx::query(
            "SELECT name, COUNT(*) FILTER (WHERE is_active) AS active \
             FROM fu_versions WHERE name = ANY($1) GROUP BY name",
        )
        .bind(&names)
        .fetch_all(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
        for row in rows {
            let name: String = row
                .try_get("name")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let active: i64 = row
                .try_get("active")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            if active != 1 {
                return Err(StorageError::InvariantViolation(format!(
                    "function unit {} would have {} active versions",
                    name, active
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UnitTransaction for PgUnitTransaction {
    async fn get_version(&mut self, id: VersionId) -> StorageResult<Option<FunctionUnitVersion>> {
        self.fetch_version(id).await
    }

    async fn list_versions(&mut self, name: &str) -> StorageResult<Vec<FunctionUnitVersion>> {
        let tx = self.tx()?;
        let rows = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM fu_versions WHERE name = $1 \
             ORDER BY major DESC, minor DESC, patch DESC"
        ))
        .bind(name)
        .fetch_all(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
        let records: Vec<FunctionUnitVersion> = rows
            .into_iter()
            .map(version_row_to_record)
            .collect::<StorageResult<_>>()?;
        for record in &records {
            self.read_stamps.entry(record.id).or_insert(record.row_version);
        }
        Ok(records)
    }

    async fn insert_version(&mut self, new: NewVersion) -> StorageResult<FunctionUnitVersion> {
        let tx = self.tx()?;
        let text = new.version.to_string();
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM fu_versions WHERE name = $1 AND semantic_version = $2)",
        )
        .bind(&new.name)
        .bind(&text)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
        if exists {
            return Err(StorageError::Duplicate(format!(
                "{} {} already exists",
                new.name, text
            )));
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO fu_versions
                (name, semantic_version, major, minor, patch, is_active, deployed_at,
                 previous_version_id, metadata, row_version)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7, $8, 1)
            RETURNING {VERSION_COLUMNS}
            "#
        ))
        .bind(&new.name)
        .bind(&text)
        .bind(to_i64(new.version.major)?)
        .bind(to_i64(new.version.minor)?)
        .bind(to_i64(new.version.patch)?)
        .bind(new.deployed_at)
        .bind(new.previous_version.map(|v| v.value()))
        .bind(&new.metadata)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        let record = version_row_to_record(row)?;
        self.read_stamps.insert(record.id, record.row_version);
        self.touched_names.insert(record.name.clone());
        Ok(record)
    }

    async fn set_active(&mut self, id: VersionId, active: bool) -> StorageResult<()> {
        let record = self.require_version(id).await?;
        let stamp = self.stamp_for(&record);
        let tx = self.tx()?;
        let result = sqlx::query(
            "UPDATE fu_versions SET is_active = $1, row_version = row_version + 1 \
             WHERE id = $2 AND row_version = $3",
        )
        .bind(active)
        .bind(id.value())
        .bind(to_i64(stamp)?)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "{} was modified concurrently",
                id
            )));
        }
        self.read_stamps.insert(id, stamp + 1);
        self.touched_names.insert(record.name);
        Ok(())
    }

    async fn delete_version(&mut self, id: VersionId) -> StorageResult<()> {
        let record = self.require_version(id).await?;
        let stamp = self.stamp_for(&record);
        let tx = self.tx()?;
        let result = sqlx::query("DELETE FROM fu_versions WHERE id = $1 AND row_version = $2")
            .bind(id.value())
            .bind(to_i64(stamp)?)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "{} was modified concurrently",
                id
            )));
        }
        self.read_stamps.remove(&id);
        self.touched_names.insert(record.name);
        Ok(())
    }

    async fn insert_definition(&mut self, new: NewDefinition) -> StorageResult<DefinitionSnapshot> {
        self.require_version(new.version_id).await?;
        let tx = self.tx()?;
        let row = sqlx::query(
            r#"
            INSERT INTO fu_definitions (version_id, definition_key, raw_definition, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING version_id, definition_key, raw_definition, created_at
            "#,
        )
        .bind(new.version_id.value())
        .bind(&new.definition_key)
        .bind(&new.raw_definition)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| match map_sqlx_error(e) {
            StorageError::Conflict(msg) => StorageError::Duplicate(msg),
            other => other,
        })?;
        definition_row_to_record(row)
    }

    async fn list_grants(&mut self, version_id: VersionId) -> StorageResult<Vec<AccessGrant>> {
        let tx = self.tx()?;
        let rows = sqlx::query(
            "SELECT id, version_id, access_type, target_type, target_id \
             FROM fu_access_grants WHERE version_id = $1 ORDER BY id",
        )
        .bind(version_id.value())
        .fetch_all(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(grant_row_to_record).collect()
    }

    async fn insert_grants(
        &mut self,
        version_id: VersionId,
        rules: Vec<AccessRule>,
    ) -> StorageResult<Vec<AccessGrant>> {
        self.require_version(version_id).await?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }
        let tx = self.tx()?;
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO fu_access_grants (version_id, access_type, target_type, target_id) ",
        );
        builder.push_values(rules, |mut b, rule| {
            b.push_bind(version_id.value())
                .push_bind(rule.access_type.as_str())
                .push_bind(rule.target_type.as_str())
                .push_bind(rule.target_id);
        });
        builder.push(" RETURNING id, version_id, access_type, target_type, target_id");

        let rows = builder
            .build()
            .fetch_all(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        rows.into_iter().map(grant_row_to_record).collect()
    }

    async fn delete_grants(&mut self, version_id: VersionId) -> StorageResult<u64> {
        self.require_version(version_id).await?;
        let tx = self.tx()?;
        let result = sqlx::query("DELETE FROM fu_access_grants WHERE version_id = $1")
            .bind(version_id.value())
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn count_instances(&mut self, version_id: VersionId) -> StorageResult<u64> {
        let tx = self.tx()?;
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM fu_process_instances WHERE version_id = $1")
                .bind(version_id.value())
                .fetch_one(&mut **tx)
                .await
                .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }

    async fn insert_instance(&mut self, instance: ProcessInstance) -> StorageResult<()> {
        let tx = self.tx()?;
        sqlx::query(
            r#"
            INSERT INTO fu_process_instances
                (id, version_id, unit_name, definition_key, start_user_id, start_user_name,
                 variables, status, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(instance.id.as_str())
        .bind(instance.version_id.value())
        .bind(&instance.unit_name)
        .bind(&instance.definition_key)
        .bind(&instance.start_user_id)
        .bind(&instance.start_user_name)
        .bind(&instance.variables)
        .bind(instance.status.as_str())
        .bind(instance.started_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if sqlstate(&e).as_deref() == Some("23503") {
                StorageError::NotFound(format!("{} no longer exists", instance.version_id))
            } else {
                map_sqlx_error(e)
            }
        })?;
        Ok(())
    }

    async fn update_instance_status(
        &mut self,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> StorageResult<()> {
        let tx = self.tx()?;
        let result = sqlx::query("UPDATE fu_process_instances SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id.as_str())
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("{} not found", id)));
        }
        Ok(())
    }

    async fn delete_instance(&mut self, id: &InstanceId) -> StorageResult<()> {
        let tx = self.tx()?;
        let result = sqlx::query("DELETE FROM fu_process_instances WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("{} not found", id)));
        }
        Ok(())
    }

    async fn delete_instances_for_version(&mut self, version_id: VersionId) -> StorageResult<u64> {
        let tx = self.tx()?;
        let result = sqlx::query("DELETE FROM fu_process_instances WHERE version_id = $1")
            .bind(version_id.value())
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        if let Err(err) = self.check_single_active().await {
            if let Some(tx) = self.tx.take() {
                let _ = tx.rollback().await;
            }
            return Err(err);
        }
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StorageError::Backend("transaction already finished".to_string()))?;
        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(names = ?self.touched_names, "committed unit transaction");
        Ok(())
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StorageError::Backend("transaction already finished".to_string()))?;
        tx.rollback()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.to_string()),
        _ => None,
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    match sqlstate(&err).as_deref() {
        // serialization_failure, deadlock_detected
        Some("40001") | Some("40P01") => StorageError::Conflict(err.to_string()),
        // unique_violation, foreign_key_violation
        Some("23505") | Some("23503") => StorageError::Conflict(err.to_string()),
        _ => StorageError::Backend(err.to_string()),
    }
}

fn to_i64(value: u64) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput(format!("value {value} too large")))
}

fn from_i64(value: i64, column: &str) -> StorageResult<u64> {
    u64::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("negative {column}: {value}")))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> StorageResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StorageError::Backend(e.to_string()))
}

fn version_row_to_record(row: PgRow) -> StorageResult<FunctionUnitVersion> {
    let text: String = get(&row, "semantic_version")?;
    let version =
        SemanticVersion::parse(&text).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let previous: Option<i64> = get(&row, "previous_version_id")?;
    Ok(FunctionUnitVersion {
        id: VersionId::new(get(&row, "id")?),
        name: get(&row, "name")?,
        version,
        is_active: get(&row, "is_active")?,
        deployed_at: get(&row, "deployed_at")?,
        previous_version: previous.map(VersionId::new),
        metadata: get(&row, "metadata")?,
        row_version: from_i64(get(&row, "row_version")?, "row_version")?,
    })
}

fn definition_row_to_record(row: PgRow) -> StorageResult<DefinitionSnapshot> {
    Ok(DefinitionSnapshot {
        version_id: VersionId::new(get(&row, "version_id")?),
        definition_key: get(&row, "definition_key")?,
        raw_definition: get(&row, "raw_definition")?,
        created_at: get(&row, "created_at")?,
    })
}

fn grant_row_to_record(row: PgRow) -> StorageResult<AccessGrant> {
    let access_type: String = get(&row, "access_type")?;
    let target_type: String = get(&row, "target_type")?;
    Ok(AccessGrant {
        id: GrantId::new(get(&row, "id")?),
        version_id: VersionId::new(get(&row, "version_id")?),
        rule: AccessRule {
            access_type: access_type.parse().map_err(StorageError::Serialization)?,
            target_type: target_type.parse().map_err(StorageError::Serialization)?,
            target_id: get(&row, "target_id")?,
        },
    })
}

fn instance_row_to_record(row: PgRow) -> StorageResult<ProcessInstance> {
    let id: String = get(&row, "id")?;
    let status: String = get(&row, "status")?;
    Ok(ProcessInstance {
        id: InstanceId::new(id),
        version_id: VersionId::new(get(&row, "version_id")?),
        unit_name: get(&row, "unit_name")?,
        definition_key: get(&row, "definition_key")?,
        start_user_id: get(&row, "start_user_id")?,
        start_user_name: get(&row, "start_user_name")?,
        variables: get(&row, "variables")?,
        status: status.parse().map_err(StorageError::Serialization)?,
        started_at: get(&row, "started_at")?,
    })
}
