mod common;

use std::sync::Arc;

use pulse_core::models::{PluginKey, RegisterValue, ResourceKey, TaskId};
use pulse_core::{ErrorKind, PluginCatalog, TaskStore};
use pulse_infrastructure::MemoryStore;
use pulse_testing_utils::{MockCollector, TaskDefinitionBuilder};
use pulse_tribe::{InMemoryNetwork, TribeNotice};

use common::{node, NodeBuilder};

#[tokio::test]
async fn test_add_agreement_validation() {
    let network = InMemoryNetwork::new();
    let n1 = node(&network, "n1").await;

    let agreement = n1.tribe.add_agreement("Agree1").await.unwrap();
    assert_eq!(agreement.name, "Agree1");
    assert!(agreement.members.is_empty());

    let err = n1.tribe.add_agreement("Agree1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let err = n1.tribe.add_agreement("bad name").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(n1.tribe.get_agreements().await.len(), 1);
    let err = n1.tribe.get_agreement("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_join_then_leave_restores_member() {
    let network = InMemoryNetwork::new();
    let n1 = NodeBuilder::new("n1")
        .with_local_task(TaskDefinitionBuilder::new("t1").build())
        .build(&network)
        .await;
    let t1 = TaskId::from("t1");

    n1.tribe.add_agreement("a").await.unwrap();
    n1.tribe.add_task("a", &t1).await.unwrap();
    // 尚未加入，任务不会被接管
    assert!(!n1.port.is_adopted(&t1));

    n1.tribe.join("n1", "a").await.unwrap();
    assert!(n1.port.is_adopted(&t1));
    assert_eq!(
        n1.tribe.get_member("n1").await.unwrap().agreement.as_deref(),
        Some("a")
    );
    assert!(n1.tribe.get_agreement("a").await.unwrap().members.contains("n1"));

    n1.tribe.leave("a", "n1").await.unwrap();
    assert!(!n1.port.is_adopted(&t1));
    assert_eq!(n1.port.released(), vec![(t1, "a".to_string())]);
    assert_eq!(n1.tribe.get_member("n1").await.unwrap().agreement, None);
    assert!(n1.tribe.get_agreement("a").await.unwrap().members.is_empty());
}

#[tokio::test]
async fn test_join_errors() {
    let network = InMemoryNetwork::new();
    let n1 = node(&network, "n1").await;
    n1.tribe.add_agreement("a").await.unwrap();
    n1.tribe.add_agreement("b").await.unwrap();

    let err = n1.tribe.join("ghost", "a").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = n1.tribe.join("n1", "missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    n1.tribe.join("n1", "a").await.unwrap();
    // 重复加入同一 agreement 不产生新事件
    let before = n1.tribe.applied().await;
    n1.tribe.join("n1", "a").await.unwrap();
    assert_eq!(n1.tribe.applied().await, before);

    let err = n1.tribe.join("n1", "b").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = n1.tribe.leave("b", "n1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_delete_agreement_requires_force_when_members_remain() {
    let network = InMemoryNetwork::new();
    let n1 = NodeBuilder::new("n1")
        .with_local_task(TaskDefinitionBuilder::new("t1").build())
        .build(&network)
        .await;
    let t1 = TaskId::from("t1");

    n1.tribe.add_agreement("a").await.unwrap();
    n1.tribe.add_task("a", &t1).await.unwrap();
    n1.tribe.join("n1", "a").await.unwrap();

    let err = n1.tribe.delete_agreement("a", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(n1.port.is_adopted(&t1));

    n1.tribe.delete_agreement("a", true).await.unwrap();
    assert!(n1.tribe.get_agreements().await.is_empty());
    assert!(!n1.port.is_adopted(&t1));
    assert_eq!(n1.tribe.get_member("n1").await.unwrap().agreement, None);

    // 同名 agreement 重建后不会复活旧的任务和成员
    n1.tribe.add_agreement("a").await.unwrap();
    let agreement = n1.tribe.get_agreement("a").await.unwrap();
    assert!(agreement.tasks.is_empty());
    assert!(agreement.members.is_empty());

    let err = n1.tribe.delete_agreement("missing", true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_task_resource_errors() {
    let network = InMemoryNetwork::new();
    let n1 = NodeBuilder::new("n1")
        .with_local_task(TaskDefinitionBuilder::new("t1").build())
        .build(&network)
        .await;
    let t1 = TaskId::from("t1");
    n1.tribe.add_agreement("a").await.unwrap();

    let err = n1.tribe.add_task("a", &TaskId::from("nope")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = n1.tribe.add_task("missing", &t1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    n1.tribe.add_task("a", &t1).await.unwrap();
    let err = n1.tribe.add_task("a", &t1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    n1.tribe.remove_task("a", &t1).await.unwrap();
    let err = n1.tribe.remove_task("a", &t1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_agreement_plugins_are_loaded_on_members() {
    let network = InMemoryNetwork::new();
    let n1 = node(&network, "n1").await;
    let extra = PluginKey::collector("extra", 1);
    n1.catalogs
        .plugins
        .install(extra.clone(), Arc::new(MockCollector::new()))
        .await;

    n1.tribe.add_agreement("a").await.unwrap();
    n1.tribe.join("n1", "a").await.unwrap();
    n1.tribe.add_plugin("a", &extra).await.unwrap();
    assert!(n1.catalogs.plugins.get(&extra).await.is_ok());

    let err = n1.tribe.add_plugin("a", &extra).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    n1.tribe.remove_plugin("a", &extra).await.unwrap();
    assert!(n1.catalogs.plugins.get(&extra).await.is_err());
    let err = n1.tribe.remove_plugin("a", &extra).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = n1
        .tribe
        .add_plugin("a", &PluginKey::publisher("absent", 9))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_plugins_loaded_elsewhere_are_left_loaded() {
    let network = InMemoryNetwork::new();
    let n1 = node(&network, "n1").await;
    let tag = PluginKey::processor("tag", 1);

    n1.tribe.add_agreement("a").await.unwrap();
    n1.tribe.join("n1", "a").await.unwrap();
    n1.tribe.add_plugin("a", &tag).await.unwrap();
    n1.tribe.remove_plugin("a", &tag).await.unwrap();

    assert!(n1.catalogs.plugins.get(&tag).await.is_ok());
}

#[tokio::test]
async fn test_rejected_task_is_reported_once() {
    let network = InMemoryNetwork::new();
    let n1 = NodeBuilder::new("n1")
        .with_local_task(TaskDefinitionBuilder::new("t1").build())
        .build(&network)
        .await;
    let mut notices = n1.tribe.subscribe();
    n1.port.set_fail_adopt(true);

    n1.tribe.add_agreement("a").await.unwrap();
    n1.tribe.add_task("a", &TaskId::from("t1")).await.unwrap();
    n1.tribe.join("n1", "a").await.unwrap();
    n1.tribe.add_agreement("b").await.unwrap();

    match notices.try_recv().unwrap() {
        TribeNotice::Divergence { reason } => assert!(reason.contains("t1")),
        other => panic!("unexpected notice: {other:?}"),
    }
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn test_agreements_survive_restart() {
    let network = InMemoryNetwork::new();
    let store = Arc::new(MemoryStore::new());
    let definition = TaskDefinitionBuilder::new("t1").build();

    let n1 = NodeBuilder::new("n1")
        .with_local_task(definition.clone())
        .with_store(store.clone())
        .build(&network)
        .await;
    n1.tribe.add_agreement("a").await.unwrap();
    n1.tribe.add_task("a", &definition.id).await.unwrap();
    n1.tribe.join("n1", "a").await.unwrap();

    let saved = store.load_tribe_snapshot().await.unwrap().unwrap();
    assert_eq!(saved.vector.get("n1"), 3);
    assert!(saved.registers.iter().any(|entry| {
        entry.key == ResourceKey::Membership("n1".into())
            && entry.value == RegisterValue::Member("a".into())
    }));

    let restarted = NodeBuilder::new("n1")
        .with_store(store.clone())
        .build(&InMemoryNetwork::new())
        .await;
    assert_eq!(restarted.tribe.restore().await.unwrap(), 1);
    let agreement = restarted.tribe.get_agreement("a").await.unwrap();
    assert!(agreement.tasks.contains_key(&definition.id));
    assert!(restarted.port.is_adopted(&definition.id));

    // 本节点的事件计数从快照继续
    restarted.tribe.add_agreement("b").await.unwrap();
    assert_eq!(restarted.tribe.applied().await.get("n1"), 4);
}
