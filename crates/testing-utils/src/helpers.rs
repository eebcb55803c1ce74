//! Test helper utilities and common testing patterns

use std::sync::Arc;
use std::time::Duration;

use pulse_core::config::SchedulerConfig;
use pulse_core::models::MetricDefinition;
use pulse_infrastructure::{InMemoryMetricCatalog, InMemoryPluginCatalog};
use tokio::time::{sleep, Instant};

use crate::builders::{test_collector, test_publisher};
use crate::mocks::{MockCollector, RecordingPublisher};

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    ///
    /// Uses tokio time, so it also works under `start_paused = true`.
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        condition().await
    }
}

/// Plugin and metric catalogs wired with controllable test plugins
///
/// Installs and loads `collector:test:1` ([`MockCollector`]) and
/// `publisher:recorder:1` ([`RecordingPublisher`]) next to the builtin plugins.
/// The metric catalog serves `/test/foo` and `/test/bar`.
pub struct TestCatalogs {
    pub plugins: Arc<InMemoryPluginCatalog>,
    pub metrics: Arc<InMemoryMetricCatalog>,
    pub collector: MockCollector,
    pub publisher: RecordingPublisher,
}

impl TestCatalogs {
    pub async fn new() -> Self {
        let plugins = Arc::new(InMemoryPluginCatalog::with_builtins());
        let collector = MockCollector::new();
        let publisher = RecordingPublisher::new();

        plugins
            .install_loaded(test_collector(), Arc::new(collector.clone()))
            .await
            .expect("install test collector");
        plugins
            .install_loaded(test_publisher(), Arc::new(publisher.clone()))
            .await
            .expect("install test publisher");
        plugins.load_all().await.expect("load builtin plugins");

        let metrics = Arc::new(InMemoryMetricCatalog::new(vec![
            MetricDefinition::new("/test/foo", 1).with_collector(test_collector()),
            MetricDefinition::new("/test/bar", 1).with_collector(test_collector()),
        ]));

        Self {
            plugins,
            metrics,
            collector,
            publisher,
        }
    }
}

pub fn test_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        failure_threshold: 3,
        default_deadline_ms: 5_000,
        watch_buffer: 64,
    }
}
