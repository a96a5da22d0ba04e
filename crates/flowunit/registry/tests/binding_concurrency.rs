use chrono::Utc;
use flowunit_registry::{
    InMemoryWorkflowEngine, ProcessBindingStore, StartInstance, VersionRegistry, WorkflowEngine,
};
use flowunit_storage::{InMemoryUnitStore, NewVersion, UnitStore};
use flowunit_types::{definition_key, SemanticVersion, VersionId};
use std::sync::Arc;

async fn seed(
    store: &Arc<dyn UnitStore>,
    engine: &InMemoryWorkflowEngine,
    registry: &VersionRegistry,
    versions: &[&str],
) -> Vec<VersionId> {
    let mut ids = Vec::new();
    for text in versions {
        let version: SemanticVersion = text.parse().unwrap();
        let key = definition_key("expense", &version);
        engine.deploy(&key, "<definitions/>", &key).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let row = tx
            .insert_version(NewVersion {
                name: "expense".to_string(),
                version,
                previous_version: None,
                metadata: serde_json::Value::Null,
                deployed_at: Utc::now(),
            })
            .await
            .unwrap();
        registry.activate_in(tx.as_mut(), row.id).await.unwrap();
        tx.commit().await.unwrap();
        ids.push(row.id);
    }
    ids
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn instances_started_during_activations_keep_their_binding() {
    let store: Arc<dyn UnitStore> = Arc::new(InMemoryUnitStore::new());
    let engine = Arc::new(InMemoryWorkflowEngine::new());
    let registry = VersionRegistry::new(store.clone());
    let bindings = ProcessBindingStore::new(store.clone(), engine.clone());
    let ids = seed(&store, &engine, &registry, &["1.0.0", "1.1.0", "2.0.0"]).await;

    let mut handles = Vec::new();
    for i in 0..30 {
        let registry = registry.clone();
        let bindings = bindings.clone();
        let target = ids[i % ids.len()];
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                let _ = registry.activate_version(target).await;
                None
            } else {
                Some(
                    bindings
                        .create_instance(StartInstance::new("expense", format!("user-{i}")))
                        .await
                        .unwrap(),
                )
            }
        }));
    }

    let mut created = Vec::new();
    for handle in handles {
        if let Some(instance) = handle.await.unwrap() {
            created.push(instance);
        }
    }

    assert_eq!(created.len(), 15);
    registry.validate_single_active("expense").await.unwrap();
    for instance in created {
        let stored = bindings.get_instance(&instance.id).await.unwrap();
        assert_eq!(stored.version_id, instance.version_id);
        let version = registry.get_version(stored.version_id).await.unwrap();
        assert_eq!(stored.definition_key, version.definition_key());
    }
}
