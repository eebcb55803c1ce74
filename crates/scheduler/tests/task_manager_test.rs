use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pulse_core::models::{
    PluginKey, Schedule, TaskEvent, TaskFilter, TaskId, TaskOrigin, TaskState,
};
use pulse_core::{ErrorKind, LocalTaskPort, PulseError, TaskStore};
use pulse_infrastructure::{MemoryStore, MetricsCollector};
use pulse_scheduler::{FireOutcome, TaskManager};
use pulse_testing_utils::{
    test_scheduler_config, TaskDefinitionBuilder, TaskSpecBuilder, TestCatalogs, WorkflowBuilder,
};
use tokio::time::sleep;

fn manager(catalogs: &TestCatalogs) -> TaskManager {
    manager_with_store(catalogs, None)
}

fn manager_with_store(catalogs: &TestCatalogs, store: Option<Arc<dyn TaskStore>>) -> TaskManager {
    TaskManager::new(
        test_scheduler_config(),
        catalogs.plugins.clone(),
        catalogs.metrics.clone(),
        store,
        Arc::new(MetricsCollector::new()),
    )
}

#[tokio::test(start_paused = true)]
async fn test_simple_task_fires_and_reports() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);

    let id = manager
        .create(TaskSpecBuilder::new().with_interval(Duration::from_secs(1)).build())
        .await
        .unwrap();
    let mut watcher = manager.watch(&id).await.unwrap();
    assert_eq!(manager.get(&id).await.unwrap().state, TaskState::Stopped);

    manager.start(&id).await.unwrap();
    sleep(Duration::from_millis(1500)).await;

    let task = manager.get(&id).await.unwrap();
    assert_eq!(task.hit_count, 1);
    assert_eq!(task.miss_count, 0);
    assert_eq!(task.state, TaskState::Spinning);
    assert!(task.last_fire_at.is_some());

    let events = watcher.drain();
    assert!(matches!(
        events[0],
        TaskEvent::StateChanged {
            from: TaskState::Stopped,
            to: TaskState::Spinning,
            ..
        }
    ));
    assert!(matches!(events[1], TaskEvent::FireStarted { .. }));
    assert!(matches!(
        events[2],
        TaskEvent::FireCompleted { metrics: 1, .. }
    ));
    assert_eq!(catalogs.publisher.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_task_requires_enable_before_start() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);
    let id = manager
        .create(TaskSpecBuilder::new().started().build())
        .await
        .unwrap();
    assert_eq!(manager.get(&id).await.unwrap().state, TaskState::Spinning);

    manager.disable(&id, "maintenance").await.unwrap();
    let task = manager.get(&id).await.unwrap();
    assert_eq!(task.state, TaskState::Disabled);
    assert_eq!(task.disabled_reason.as_deref(), Some("maintenance"));

    let err = manager.start(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    manager.enable(&id).await.unwrap();
    assert_eq!(manager.get(&id).await.unwrap().state, TaskState::Stopped);
    manager.start(&id).await.unwrap();
    assert_eq!(manager.get(&id).await.unwrap().state, TaskState::Spinning);

    // 禁用期间计时器被取消
    manager.disable(&id, "again").await.unwrap();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(manager.get(&id).await.unwrap().hit_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_start_round_trip_is_idempotent() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);
    let id = manager
        .create(TaskSpecBuilder::new().started().build())
        .await
        .unwrap();

    manager.start(&id).await.unwrap();
    manager.stop(&id).await.unwrap();
    manager.stop(&id).await.unwrap();
    assert_eq!(manager.get(&id).await.unwrap().state, TaskState::Stopped);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(manager.get(&id).await.unwrap().hit_count, 0);

    manager.start(&id).await.unwrap();
    assert_eq!(manager.get(&id).await.unwrap().state, TaskState::Spinning);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_fires_are_skipped_as_misses() {
    let catalogs = TestCatalogs::new().await;
    catalogs.collector.set_delay(Duration::from_millis(2500));
    let manager = manager(&catalogs);
    let id = manager
        .create(
            TaskSpecBuilder::new()
                .with_deadline(Duration::from_secs(10))
                .started()
                .build(),
        )
        .await
        .unwrap();
    let mut watcher = manager.watch(&id).await.unwrap();

    sleep(Duration::from_millis(3200)).await;
    let task = manager.get(&id).await.unwrap();
    assert_eq!(task.state, TaskState::Running);
    assert_eq!(task.hit_count, 0);
    assert_eq!(task.miss_count, 2);
    assert_eq!(catalogs.collector.calls(), 1);

    let skipped = watcher
        .drain()
        .into_iter()
        .filter(|e| matches!(e, TaskEvent::FireSkipped { .. }))
        .count();
    assert_eq!(skipped, 2);

    sleep(Duration::from_millis(500)).await;
    let task = manager.get(&id).await.unwrap();
    assert_eq!(task.hit_count, 1);
    assert_eq!(task.state, TaskState::Spinning);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_failures_auto_disable() {
    let catalogs = TestCatalogs::new().await;
    catalogs.collector.set_failing(true);
    let manager = manager(&catalogs);
    let id = manager
        .create(TaskSpecBuilder::new().started().build())
        .await
        .unwrap();

    sleep(Duration::from_millis(3500)).await;
    let task = manager.get(&id).await.unwrap();
    assert_eq!(task.state, TaskState::Disabled);
    assert_eq!(task.failed_count, 3);
    assert_eq!(task.consecutive_failures, 3);
    assert!(task.last_failure.unwrap().contains("mock collector failure"));
    assert!(task.disabled_reason.is_some());

    sleep(Duration::from_secs(3)).await;
    assert_eq!(manager.get(&id).await.unwrap().failed_count, 3);

    catalogs.collector.set_failing(false);
    manager.enable(&id).await.unwrap();
    manager.start(&id).await.unwrap();
    sleep(Duration::from_millis(1500)).await;
    let task = manager.get(&id).await.unwrap();
    assert_eq!(task.hit_count, 1);
    assert_eq!(task.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_run_lets_run_finish() {
    let catalogs = TestCatalogs::new().await;
    catalogs.collector.set_delay(Duration::from_millis(500));
    let manager = manager(&catalogs);
    let id = manager
        .create(TaskSpecBuilder::new().started().build())
        .await
        .unwrap();

    sleep(Duration::from_millis(1200)).await;
    assert_eq!(manager.get(&id).await.unwrap().state, TaskState::Running);
    manager.stop(&id).await.unwrap();
    assert_eq!(manager.get(&id).await.unwrap().state, TaskState::Stopped);

    sleep(Duration::from_secs(3)).await;
    let task = manager.get(&id).await.unwrap();
    assert_eq!(task.state, TaskState::Stopped);
    assert_eq!(task.hit_count, 1);
    assert_eq!(catalogs.collector.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remove_requires_stopped_task_and_ends_watch() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);
    let id = manager
        .create(TaskSpecBuilder::new().started().build())
        .await
        .unwrap();
    let mut watcher = manager.watch(&id).await.unwrap();

    let err = manager.remove(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    manager.stop(&id).await.unwrap();
    manager.remove(&id).await.unwrap();
    assert!(matches!(
        manager.get(&id).await,
        Err(PulseError::TaskNotFound { .. })
    ));

    assert!(matches!(
        watcher.next().await,
        Some(TaskEvent::StateChanged {
            to: TaskState::Stopped,
            ..
        })
    ));
    assert_eq!(watcher.next().await, None);
    assert!(manager.is_empty().await);
}

#[tokio::test]
async fn test_create_validation_errors() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);

    let unknown_plugin = TaskSpecBuilder::new()
        .with_workflow(
            WorkflowBuilder::new()
                .with_publisher(PluginKey::publisher("missing", 1))
                .build(),
        )
        .build();
    let err = manager.create(unknown_plugin).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let unknown_metric = TaskSpecBuilder::new()
        .with_workflow(
            WorkflowBuilder::new()
                .with_collector(PluginKey::collector("test", 1), &["/nope/*"])
                .build(),
        )
        .build();
    let err = manager.create(unknown_metric).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let zero_interval = TaskSpecBuilder::new().with_interval(Duration::ZERO).build();
    assert_eq!(
        manager.create(zero_interval).await.unwrap_err().kind(),
        ErrorKind::Validation
    );

    let bad_cron = TaskSpecBuilder::new()
        .with_schedule(Schedule::cron("every tuesday"))
        .build();
    assert_eq!(
        manager.create(bad_cron).await.unwrap_err().kind(),
        ErrorKind::Validation
    );

    let wrong_kind = TaskSpecBuilder::new()
        .with_workflow(
            WorkflowBuilder::new()
                .with_publisher(PluginKey::collector("test", 1))
                .build(),
        )
        .build();
    assert_eq!(
        manager.create(wrong_kind).await.unwrap_err().kind(),
        ErrorKind::Validation
    );

    assert!(manager.is_empty().await);
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);
    let id = TaskId::from("missing");

    for err in [
        manager.start(&id).await.unwrap_err(),
        manager.stop(&id).await.unwrap_err(),
        manager.enable(&id).await.unwrap_err(),
        manager.disable(&id, "x").await.unwrap_err(),
        manager.remove(&id).await.unwrap_err(),
        manager.trigger(&id).await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert!(manager.watch(&id).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_windowed_schedule_ends_after_window() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);
    let stop = Utc::now() + chrono::Duration::milliseconds(2500);
    let id = manager
        .create(
            TaskSpecBuilder::new()
                .with_schedule(Schedule::windowed(Duration::from_secs(1), None, Some(stop)))
                .started()
                .build(),
        )
        .await
        .unwrap();

    sleep(Duration::from_secs(4)).await;
    let task = manager.get(&id).await.unwrap();
    assert_eq!(task.state, TaskState::Ended);
    assert_eq!(task.hit_count, 2);
    assert_eq!(manager.start(&id).await.unwrap_err().kind(), ErrorKind::InvalidState);
}

#[tokio::test(start_paused = true)]
async fn test_windowed_schedule_waits_for_start() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);
    let start = Utc::now() + chrono::Duration::seconds(3);
    let id = manager
        .create(
            TaskSpecBuilder::new()
                .with_schedule(Schedule::windowed(Duration::from_secs(1), Some(start), None))
                .started()
                .build(),
        )
        .await
        .unwrap();

    sleep(Duration::from_millis(2500)).await;
    assert_eq!(manager.get(&id).await.unwrap().hit_count, 0);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.get(&id).await.unwrap().hit_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_streaming_task_fires_on_trigger() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);
    let streaming = manager
        .create(TaskSpecBuilder::new().with_schedule(Schedule::Streaming).build())
        .await
        .unwrap();

    assert_eq!(
        manager.trigger(&streaming).await.unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    manager.start(&streaming).await.unwrap();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(manager.get(&streaming).await.unwrap().hit_count, 0);

    manager.trigger(&streaming).await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.get(&streaming).await.unwrap().hit_count, 1);

    let simple = manager
        .create(TaskSpecBuilder::new().started().build())
        .await
        .unwrap();
    assert_eq!(
        manager.trigger(&simple).await.unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[tokio::test]
async fn test_fire_directly() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);
    let id = manager.create(TaskSpecBuilder::new().build()).await.unwrap();

    assert_eq!(manager.fire(&id).await.unwrap(), FireOutcome::NotArmed);

    manager.start(&id).await.unwrap();
    match manager.fire(&id).await.unwrap() {
        FireOutcome::Completed(report) => {
            assert_eq!(report.collected, 1);
            assert_eq!(report.published, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let task = manager.get(&id).await.unwrap();
    assert_eq!(task.state, TaskState::Spinning);
    assert_eq!(task.hit_count, 1);
}

#[tokio::test]
async fn test_list_filters_by_state() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);
    let a = manager
        .create(TaskSpecBuilder::new().with_name("a").started().build())
        .await
        .unwrap();
    manager
        .create(TaskSpecBuilder::new().with_name("b").build())
        .await
        .unwrap();

    assert_eq!(manager.list(&TaskFilter::default()).await.len(), 2);
    let spinning = manager.list(&TaskFilter::by_state(TaskState::Spinning)).await;
    assert_eq!(spinning.len(), 1);
    assert_eq!(spinning[0].id, a);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_adopt_and_release_track_origins() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);

    let replicated = TaskDefinitionBuilder::new("replicated").build();
    manager.adopt(replicated.clone(), "agree1").await.unwrap();
    let task = manager.get(&replicated.id).await.unwrap();
    assert_eq!(task.state, TaskState::Spinning);
    assert!(task.has_origin(&TaskOrigin::Agreement("agree1".into())));
    assert_eq!(manager.describe(&replicated.id).await.unwrap(), replicated);

    // 再次接管是幂等的
    manager.adopt(replicated.clone(), "agree1").await.unwrap();
    assert_eq!(manager.len().await, 1);

    manager.release(&replicated.id, "agree1").await.unwrap();
    assert!(manager.get(&replicated.id).await.is_err());
    manager.release(&replicated.id, "agree1").await.unwrap();

    let local = manager.create(TaskSpecBuilder::new().build()).await.unwrap();
    let definition = manager.describe(&local).await.unwrap();
    manager.adopt(definition, "agree1").await.unwrap();
    assert_eq!(manager.get(&local).await.unwrap().state, TaskState::Spinning);

    manager.release(&local, "agree1").await.unwrap();
    let task = manager.get(&local).await.unwrap();
    assert_eq!(task.state, TaskState::Stopped);
    assert_eq!(
        task.origins.into_iter().collect::<Vec<_>>(),
        vec![TaskOrigin::Local]
    );
}

#[tokio::test(start_paused = true)]
async fn test_restore_rearms_spinning_tasks() {
    let catalogs = TestCatalogs::new().await;
    let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new());

    let first = manager_with_store(&catalogs, Some(store.clone()));
    let armed = first
        .create(TaskSpecBuilder::new().with_name("armed").started().build())
        .await
        .unwrap();
    let idle = first
        .create(TaskSpecBuilder::new().with_name("idle").build())
        .await
        .unwrap();
    first.shutdown().await;

    let second = manager_with_store(&catalogs, Some(store));
    assert_eq!(second.restore().await.unwrap(), 2);
    assert_eq!(second.get(&idle).await.unwrap().state, TaskState::Stopped);
    assert_eq!(second.get(&armed).await.unwrap().state, TaskState::Spinning);

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(second.get(&armed).await.unwrap().hit_count, 1);
    assert_eq!(second.get(&idle).await.unwrap().hit_count, 0);
}

#[tokio::test]
async fn test_duplicate_definition_conflicts() {
    let catalogs = TestCatalogs::new().await;
    let manager = manager(&catalogs);
    let definition = TaskDefinitionBuilder::new("dup").build();
    manager
        .create_with_definition(definition.clone(), TaskOrigin::Local)
        .await
        .unwrap();
    let err = manager
        .create_with_definition(definition, TaskOrigin::Local)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test(start_paused = true)]
async fn test_removed_task_is_not_saved_by_finishing_run() {
    let catalogs = TestCatalogs::new().await;
    catalogs.collector.set_delay(Duration::from_millis(500));
    let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new());
    let manager = manager_with_store(&catalogs, Some(store.clone()));
    let id = manager
        .create(TaskSpecBuilder::new().started().build())
        .await
        .unwrap();

    sleep(Duration::from_millis(1200)).await;
    assert_eq!(manager.get(&id).await.unwrap().state, TaskState::Running);
    manager.stop(&id).await.unwrap();
    manager.remove(&id).await.unwrap();
    assert!(store.load_tasks().await.unwrap().is_empty());

    // 执行在删除之后才结束
    sleep(Duration::from_secs(1)).await;
    assert_eq!(catalogs.collector.calls(), 1);
    assert!(store.load_tasks().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_released_task_is_not_saved_by_finishing_run() {
    let catalogs = TestCatalogs::new().await;
    catalogs.collector.set_delay(Duration::from_millis(500));
    let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new());
    let manager = manager_with_store(&catalogs, Some(store.clone()));
    let replicated = TaskDefinitionBuilder::new("replicated").build();
    manager.adopt(replicated.clone(), "agree1").await.unwrap();

    sleep(Duration::from_millis(1200)).await;
    assert_eq!(
        manager.get(&replicated.id).await.unwrap().state,
        TaskState::Running
    );
    manager.release(&replicated.id, "agree1").await.unwrap();

    sleep(Duration::from_secs(1)).await;
    assert!(manager.get(&replicated.id).await.is_err());
    assert!(store.load_tasks().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_adopt_replaces_existing_definition() {
    let catalogs = TestCatalogs::new().await;
    let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new());
    let manager = manager_with_store(&catalogs, Some(store.clone()));
    let original = TaskDefinitionBuilder::new("shared")
        .with_name("from-n1")
        .with_schedule(Schedule::simple(Duration::from_secs(1)))
        .build();
    manager
        .create_with_definition(original.clone(), TaskOrigin::Local)
        .await
        .unwrap();
    manager.start(&original.id).await.unwrap();

    let winner = TaskDefinitionBuilder::new("shared")
        .with_name("from-n2")
        .with_schedule(Schedule::simple(Duration::from_secs(10)))
        .build();
    manager.adopt(winner.clone(), "agree1").await.unwrap();

    let task = manager.get(&original.id).await.unwrap();
    assert_eq!(task.definition(), winner);
    assert_eq!(task.state, TaskState::Spinning);
    assert!(task.has_origin(&TaskOrigin::Local));
    assert!(task.has_origin(&TaskOrigin::Agreement("agree1".into())));
    assert_eq!(store.load_tasks().await.unwrap()[0].name, "from-n2");

    // 计时按新的间隔重新装载
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(manager.get(&original.id).await.unwrap().hit_count, 0);
    sleep(Duration::from_secs(9)).await;
    assert_eq!(manager.get(&original.id).await.unwrap().hit_count, 1);

    // 无法在本节点运行的定义不会替换现有任务
    let broken = TaskDefinitionBuilder::new("shared")
        .with_workflow(
            WorkflowBuilder::new()
                .with_collector(PluginKey::collector("missing", 1), &["/a"])
                .build(),
        )
        .build();
    let err = manager.adopt(broken, "agree2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let task = manager.get(&original.id).await.unwrap();
    assert_eq!(task.definition(), winner);
    assert!(!task.has_origin(&TaskOrigin::Agreement("agree2".into())));
}
