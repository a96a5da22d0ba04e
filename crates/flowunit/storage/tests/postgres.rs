//! PostgreSQL adapter against a live database.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -p flowunit-storage --features postgres -- --ignored`.

#![cfg(feature = "postgres")]

use chrono::Utc;
use flowunit_storage::postgres::PostgresUnitStore;
use flowunit_storage::{NewDefinition, NewVersion, StorageError, UnitStore, UnitTransaction};
use flowunit_types::{AccessRule, AccessType, SemanticVersion, TargetType, VersionId};

async fn store() -> PostgresUnitStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    PostgresUnitStore::connect(&url).await.unwrap()
}

/// Unit name not used by earlier runs against the same database
fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", Utc::now().timestamp_micros())
}

async fn insert(
    tx: &mut dyn UnitTransaction,
    name: &str,
    version: SemanticVersion,
) -> Result<VersionId, StorageError> {
    let row = tx
        .insert_version(NewVersion {
            name: name.to_string(),
            version,
            previous_version: None,
            metadata: serde_json::json!({ "source": "integration" }),
            deployed_at: Utc::now(),
        })
        .await?;
    Ok(row.id)
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn versions_round_trip_with_single_active() {
    let store = store().await;
    let name = unique_name("pg-history");

    let mut tx = store.begin().await.unwrap();
    let v1 = insert(tx.as_mut(), &name, SemanticVersion::new(1, 9, 0)).await.unwrap();
    let v2 = insert(tx.as_mut(), &name, SemanticVersion::new(1, 10, 0)).await.unwrap();
    tx.insert_definition(NewDefinition {
        version_id: v2,
        definition_key: format!("{name}_v1.10.0"),
        raw_definition: "<definitions/>".to_string(),
    })
    .await
    .unwrap();
    tx.insert_grants(v2, vec![AccessRule::new(AccessType::Use, TargetType::Role, "staff")])
        .await
        .unwrap();
    tx.set_active(v2, true).await.unwrap();
    tx.commit().await.unwrap();

    let versions = store.list_versions(&name).await.unwrap();
    let numbers: Vec<String> = versions.iter().map(|v| v.version.to_string()).collect();
    assert_eq!(numbers, vec!["1.10.0", "1.9.0"]);
    assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
    assert!(store.get_definition(v2).await.unwrap().is_some());
    assert_eq!(store.list_grants(v2).await.unwrap().len(), 1);

    let mut tx = store.begin().await.unwrap();
    tx.set_active(v2, false).await.unwrap();
    tx.set_active(v1, true).await.unwrap();
    tx.commit().await.unwrap();
    assert!(store.get_version(v1).await.unwrap().unwrap().is_active);
    assert!(!store.get_version(v2).await.unwrap().unwrap().is_active);

    let mut tx = store.begin().await.unwrap();
    tx.delete_version(v2).await.unwrap();
    tx.commit().await.unwrap();
    assert!(store.get_version(v2).await.unwrap().is_none());
    assert!(store.get_definition(v2).await.unwrap().is_none());
    assert!(store.list_grants(v2).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn duplicate_version_is_rejected() {
    let store = store().await;
    let name = unique_name("pg-duplicate");

    let mut tx = store.begin().await.unwrap();
    insert(tx.as_mut(), &name, SemanticVersion::INITIAL).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = insert(tx.as_mut(), &name, SemanticVersion::INITIAL).await.unwrap_err();
    assert!(matches!(err, StorageError::Duplicate(_)));
    tx.rollback().await.unwrap();
    assert_eq!(store.list_versions(&name).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn second_active_row_does_not_commit() {
    let store = store().await;
    let name = unique_name("pg-active");

    let mut tx = store.begin().await.unwrap();
    let v1 = insert(tx.as_mut(), &name, SemanticVersion::new(1, 0, 0)).await.unwrap();
    let v2 = insert(tx.as_mut(), &name, SemanticVersion::new(2, 0, 0)).await.unwrap();
    tx.set_active(v1, true).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let outcome = match tx.set_active(v2, true).await {
        Ok(()) => tx.commit().await,
        Err(err) => Err(err),
    };
    assert!(outcome.is_err());

    let active: Vec<_> = store
        .list_versions(&name)
        .await
        .unwrap()
        .into_iter()
        .filter(|v| v.is_active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, v1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn largest_component_is_stored() {
    let store = store().await;
    let name = unique_name("pg-ceiling");
    let top = SemanticVersion::new(SemanticVersion::MAX_COMPONENT, 0, 0);

    let mut tx = store.begin().await.unwrap();
    let id = insert(tx.as_mut(), &name, top).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(store.get_version(id).await.unwrap().unwrap().version, top);
}
