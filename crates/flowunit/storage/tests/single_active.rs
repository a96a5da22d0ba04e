use chrono::Utc;
use flowunit_storage::{InMemoryUnitStore, NewVersion, StorageError, UnitStore};
use flowunit_types::{SemanticVersion, VersionId};
use proptest::prelude::*;
use std::sync::Arc;

fn new_version(name: &str, version: SemanticVersion) -> NewVersion {
    NewVersion {
        name: name.to_string(),
        version,
        previous_version: None,
        metadata: serde_json::Value::Null,
        deployed_at: Utc::now(),
    }
}

async fn activate(store: &InMemoryUnitStore, id: VersionId) -> Result<(), StorageError> {
    let mut tx = store.begin().await?;
    let target = tx
        .get_version(id)
        .await?
        .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
    for other in tx.list_versions(&target.name).await? {
        if other.id != id && other.is_active {
            tx.set_active(other.id, false).await?;
        }
    }
    tx.set_active(id, true).await?;
    tx.commit().await
}

async fn deploy(
    store: &InMemoryUnitStore,
    name: &str,
    version: SemanticVersion,
) -> Result<VersionId, StorageError> {
    let mut tx = store.begin().await?;
    let existing = tx.list_versions(name).await?;
    let row = tx.insert_version(new_version(name, version)).await?;
    for other in existing.iter().filter(|v| v.is_active) {
        tx.set_active(other.id, false).await?;
    }
    tx.set_active(row.id, true).await?;
    tx.commit().await?;
    Ok(row.id)
}

async fn active_count(store: &InMemoryUnitStore, name: &str) -> usize {
    store
        .list_versions(name)
        .await
        .unwrap()
        .iter()
        .filter(|v| v.is_active)
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_activations_keep_one_active() {
    let store = Arc::new(InMemoryUnitStore::new());
    let mut ids = Vec::new();
    for minor in 0..6 {
        ids.push(
            deploy(&store, "payroll", SemanticVersion::new(1, minor, 0))
                .await
                .unwrap(),
        );
    }

    let mut handles = Vec::new();
    for round in 0..24 {
        let store = Arc::clone(&store);
        let id = ids[round % ids.len()];
        handles.push(tokio::spawn(async move { activate(&store, id).await }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => committed += 1,
            Err(err) => assert!(err.is_conflict(), "unexpected error: {err}"),
        }
    }

    assert!(committed >= 1);
    assert_eq!(active_count(&store, "payroll").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_of_same_version_commit_once() {
    let store = Arc::new(InMemoryUnitStore::new());
    deploy(&store, "payroll", SemanticVersion::INITIAL)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            deploy(&store, "payroll", SemanticVersion::new(1, 1, 0)).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(StorageError::Conflict(_)) | Err(StorageError::Duplicate(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners, 1);
    let versions = store.list_versions("payroll").await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(active_count(&store, "payroll").await, 1);
}

#[derive(Debug, Clone)]
enum Action {
    Deploy { unit: usize, bump: u8 },
    Activate { unit: usize, pick: usize },
    DeactivateOnly { unit: usize },
    DeleteNewest { unit: usize },
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0usize..3, 0u8..3).prop_map(|(unit, bump)| Action::Deploy { unit, bump }),
        (0usize..3, 0usize..8).prop_map(|(unit, pick)| Action::Activate { unit, pick }),
        (0usize..3).prop_map(|unit| Action::DeactivateOnly { unit }),
        (0usize..3).prop_map(|unit| Action::DeleteNewest { unit }),
    ]
}

const UNITS: [&str; 3] = ["alpha", "beta", "gamma"];

async fn run_action(store: &InMemoryUnitStore, action: Action) {
    match action {
        Action::Deploy { unit, bump } => {
            let name = UNITS[unit];
            let versions = store.list_versions(name).await.unwrap();
            let next = match versions.first() {
                None => SemanticVersion::INITIAL,
                Some(top) => match bump {
                    0 => top.version.increment_major().unwrap(),
                    1 => top.version.increment_minor().unwrap(),
                    _ => top.version.increment_patch().unwrap(),
                },
            };
            deploy(store, name, next).await.unwrap();
        }
        Action::Activate { unit, pick } => {
            let versions = store.list_versions(UNITS[unit]).await.unwrap();
            if !versions.is_empty() {
                activate(store, versions[pick % versions.len()].id)
                    .await
                    .unwrap();
            }
        }
        Action::DeactivateOnly { unit } => {
            // Never allowed to commit: it would leave the unit without an active version.
            let versions = store.list_versions(UNITS[unit]).await.unwrap();
            if let Some(active) = versions.iter().find(|v| v.is_active) {
                let mut tx = store.begin().await.unwrap();
                tx.set_active(active.id, false).await.unwrap();
                let err = tx.commit().await.unwrap_err();
                assert!(matches!(err, StorageError::InvariantViolation(_)));
            }
        }
        Action::DeleteNewest { unit } => {
            let name = UNITS[unit];
            let versions = store.list_versions(name).await.unwrap();
            if versions.len() < 2 {
                return;
            }
            let newest = &versions[0];
            let mut tx = store.begin().await.unwrap();
            tx.delete_version(newest.id).await.unwrap();
            if newest.is_active {
                tx.set_active(versions[1].id, true).await.unwrap();
            }
            tx.commit().await.unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_every_committed_state_has_one_active(actions in prop::collection::vec(action(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let store = InMemoryUnitStore::new();
            for action in actions {
                run_action(&store, action).await;
                for name in UNITS {
                    let versions = store.list_versions(name).await.unwrap();
                    let active = versions.iter().filter(|v| v.is_active).count();
                    if versions.is_empty() {
                        assert_eq!(active, 0);
                    } else {
                        assert_eq!(active, 1, "unit {name} has {active} active versions");
                    }
                }
            }
        });
    }
}
