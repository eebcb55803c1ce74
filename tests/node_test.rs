mod common;

use std::sync::Arc;

use pulse_core::models::{
    ConfigValue, PluginFilter, PluginKey, PluginType, TaskFilter, TaskId, TaskOrigin, TaskState,
};
use pulse_core::{ErrorKind, TaskStore};
use pulse_infrastructure::JsonFileStore;
use pulse_testing_utils::{TaskDefinitionBuilder, TaskSpecBuilder};
use pulse_tribe::InMemoryNetwork;

use common::test_node;

#[tokio::test]
async fn test_task_lifecycle_through_node() {
    let network = InMemoryNetwork::new();
    let n1 = test_node(&network, "n1", None).await;
    let node = &n1.node;

    let id = node
        .create_task(TaskSpecBuilder::new().with_name("cpu").started().build())
        .await
        .unwrap();
    assert_eq!(node.get_task(&id).await.unwrap().state, TaskState::Spinning);

    node.disable_task(&id).await.unwrap();
    let err = node.start_task(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    node.enable_task(&id).await.unwrap();
    node.start_task(&id).await.unwrap();
    assert_eq!(node.get_task(&id).await.unwrap().state, TaskState::Spinning);

    // 装载中的任务不能删除
    let err = node.delete_task(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    node.stop_task(&id).await.unwrap();
    node.stop_task(&id).await.unwrap();
    let stopped = node
        .list_tasks(&TaskFilter::by_state(TaskState::Stopped))
        .await;
    assert_eq!(stopped.len(), 1);

    node.delete_task(&id).await.unwrap();
    let err = node.get_task(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    node.shutdown().await;
}

#[tokio::test]
async fn test_join_then_leave_removes_replicated_tasks() {
    let network = InMemoryNetwork::new();
    let n1 = test_node(&network, "n1", None).await;
    let n2 = test_node(&network, "n2", None).await;
    n2.node.tribe().exchange(&n1.address).await.unwrap();

    let id = n1
        .node
        .create_task(TaskSpecBuilder::new().with_name("shared").build())
        .await
        .unwrap();
    n1.node.create_agreement("a").await.unwrap();
    n1.node.add_agreement_task("a", &id).await.unwrap();
    n1.node.join_agreement("a", "n2").await.unwrap();

    n2.node.tribe().exchange(&n1.address).await.unwrap();
    let adopted = n2.node.get_task(&id).await.unwrap();
    assert_eq!(adopted.name, "shared");
    assert_eq!(adopted.state, TaskState::Spinning);
    assert_eq!(
        n2.node.get_member("n2").await.unwrap().agreement,
        Some("a".to_string())
    );

    n1.node.leave_agreement("a", "n2").await.unwrap();
    n2.node.tribe().exchange(&n1.address).await.unwrap();
    assert!(n2.node.get_task(&id).await.is_err());
    assert_eq!(n2.node.get_member("n2").await.unwrap().agreement, None);

    // 发起节点上的本地任务不受影响
    assert!(n1.node.get_task(&id).await.is_ok());

    n1.node.shutdown().await;
    n2.node.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_agreement_task_converges_on_both_nodes() {
    let network = InMemoryNetwork::new();
    let n1 = test_node(&network, "n1", None).await;
    let n2 = test_node(&network, "n2", None).await;

    n1.node.create_agreement("a").await.unwrap();
    n1.node.join_agreement("a", "n1").await.unwrap();
    n2.node.tribe().exchange(&n1.address).await.unwrap();
    n1.node.join_agreement("a", "n2").await.unwrap();
    n2.node.tribe().exchange(&n1.address).await.unwrap();

    // 两个节点在互不知情时以同一 id 各自创建并加入任务
    let t = TaskId::from("t");
    for node in [&n1, &n2] {
        let definition = TaskDefinitionBuilder::new("t")
            .with_name(&format!("from-{}", node.name))
            .build();
        node.node
            .tasks()
            .create_with_definition(definition, TaskOrigin::Local)
            .await
            .unwrap();
        node.node.add_agreement_task("a", &t).await.unwrap();
    }

    n2.node.tribe().exchange(&n1.address).await.unwrap();
    n1.node.tribe().exchange(&n2.address).await.unwrap();

    let on_n1 = n1.node.get_agreement("a").await.unwrap();
    let on_n2 = n2.node.get_agreement("a").await.unwrap();
    assert_eq!(on_n1.members, on_n2.members);
    assert_eq!(on_n1.tasks, on_n2.tasks);
    assert_eq!(on_n1.tasks[&t].name, "from-n2");

    // 两个节点本地运行的都是胜出的定义
    for node in [&n1, &n2] {
        let tasks = node.node.list_tasks(&TaskFilter::default()).await;
        assert_eq!(tasks.len(), 1, "on {}", node.name);
        assert_eq!(tasks[0].name, "from-n2", "on {}", node.name);
        assert_eq!(tasks[0].state, TaskState::Spinning, "on {}", node.name);
        assert!(tasks[0].has_origin(&TaskOrigin::Agreement("a".into())));
    }

    n1.node.shutdown().await;
    n2.node.shutdown().await;
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let network = InMemoryNetwork::new();

    let store: Arc<dyn TaskStore> = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
    let first = test_node(&network, "n1", Some(store)).await;
    let id = first
        .node
        .create_task(TaskSpecBuilder::new().with_name("persisted").started().build())
        .await
        .unwrap();
    first.node.create_agreement("a").await.unwrap();
    first.node.add_agreement_task("a", &id).await.unwrap();
    first.node.shutdown().await;
    network.unregister(&first.address);
    drop(first);

    let store: Arc<dyn TaskStore> = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
    let second = test_node(&network, "n1", Some(store)).await;
    let (tasks, agreements) = second.node.restore().await.unwrap();
    assert_eq!((tasks, agreements), (1, 1));

    let task = second.node.get_task(&id).await.unwrap();
    assert_eq!(task.name, "persisted");
    assert_eq!(task.state, TaskState::Spinning);
    let agreement = second.node.get_agreement("a").await.unwrap();
    assert!(agreement.tasks.contains_key(&id));
    second.node.shutdown().await;
}

#[tokio::test]
async fn test_plugin_operations() {
    let network = InMemoryNetwork::new();
    let n1 = test_node(&network, "n1", None).await;
    let node = &n1.node;

    let collectors = node
        .list_plugins(&PluginFilter {
            plugin_type: Some(PluginType::Collector),
            ..Default::default()
        })
        .await;
    let names: Vec<&str> = collectors.iter().map(|p| p.key.name.as_str()).collect();
    assert_eq!(names, vec!["mock", "test"]);

    let key = PluginKey::publisher("file", 1);
    let mut items = pulse_core::models::ConfigMap::new();
    items.insert("path".to_string(), ConfigValue::Str("/tmp/out".to_string()));
    items.insert("append".to_string(), ConfigValue::Bool(true));
    node.set_plugin_config(&key, items).await.unwrap();
    assert_eq!(
        node.plugin_config(&key).await.unwrap().get("append"),
        Some(&ConfigValue::Bool(true))
    );

    let remaining = node
        .delete_plugin_config(&key, &["append".to_string()])
        .await
        .unwrap();
    assert!(!remaining.contains_key("append"));
    assert!(remaining.contains_key("path"));

    node.unload_plugin(&key).await.unwrap();
    assert_eq!(
        node.get_plugin(&key).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    node.load_plugin(&key).await.unwrap();
    assert_eq!(
        node.load_plugin(&key).await.unwrap_err().kind(),
        ErrorKind::Conflict
    );
}

#[tokio::test]
async fn test_metric_catalog_queries() {
    let network = InMemoryNetwork::new();
    let n1 = test_node(&network, "n1", None).await;

    assert_eq!(n1.node.list_metrics().await.len(), 2);
    let resolved = n1
        .node
        .query_metrics(&["/test/*".to_string()])
        .await
        .unwrap();
    assert_eq!(resolved.len(), 2);

    let err = n1
        .node
        .query_metrics(&["/nope".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let network = InMemoryNetwork::new();
    let n1 = test_node(&network, "n1", None).await;
    let missing = TaskId::from("missing");

    for err in [
        n1.node.start_task(&missing).await.unwrap_err(),
        n1.node.trigger_task(&missing).await.unwrap_err(),
        n1.node.get_agreement("none").await.unwrap_err(),
        n1.node.get_member("ghost").await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert!(n1.node.watch_task(&missing).await.is_err());
}

#[tokio::test]
async fn test_agreement_plugins_follow_membership() {
    let network = InMemoryNetwork::new();
    let n1 = test_node(&network, "n1", None).await;
    let n2 = test_node(&network, "n2", None).await;
    let key = PluginKey::publisher("file", 1);

    n2.node.tribe().exchange(&n1.address).await.unwrap();
    n2.node.unload_plugin(&key).await.unwrap();
    let mut notices = n2.node.subscribe_tribe();

    n1.node.create_agreement("a").await.unwrap();
    n1.node.add_agreement_plugin("a", &key).await.unwrap();
    n1.node.join_agreement("a", "n2").await.unwrap();
    n2.node.tribe().exchange(&n1.address).await.unwrap();

    assert!(n2.node.get_plugin(&key).await.is_ok());
    let members: Vec<String> = n2
        .node
        .list_members()
        .await
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(members, vec!["n1".to_string(), "n2".to_string()]);
    let names: Vec<String> = n2
        .node
        .list_agreements()
        .await
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, vec!["a".to_string()]);

    n1.node.remove_agreement_plugin("a", &key).await.unwrap();
    n2.node.tribe().exchange(&n1.address).await.unwrap();
    assert_eq!(
        n2.node.get_plugin(&key).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert!(notices.try_recv().is_err());

    let id = n1
        .node
        .create_task(TaskSpecBuilder::new().build())
        .await
        .unwrap();
    n1.node.add_agreement_task("a", &id).await.unwrap();
    n1.node.remove_agreement_task("a", &id).await.unwrap();
    assert!(n1.node.get_agreement("a").await.unwrap().tasks.is_empty());
}
