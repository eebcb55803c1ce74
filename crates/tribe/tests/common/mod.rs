//! Shared helpers for multi-node tribe tests

#![allow(dead_code)]

use std::sync::{Arc, Weak};

use pulse_core::config::{RetryConfig, TribeConfig};
use pulse_core::models::{Member, TaskDefinition};
use pulse_core::TaskStore;
use pulse_infrastructure::MetricsCollector;
use pulse_testing_utils::{MockTaskPort, TestCatalogs};
use pulse_tribe::{GossipHandler, InMemoryNetwork, TribeManager};

pub struct TestNode {
    pub name: String,
    pub address: String,
    pub tribe: Arc<TribeManager>,
    pub port: MockTaskPort,
    pub catalogs: TestCatalogs,
}

pub fn tribe_config() -> TribeConfig {
    TribeConfig {
        gossip_interval_ms: 100,
        heartbeat_interval_ms: 100,
        suspect_after_missed: 2,
        dead_timeout_ms: 1_000,
        divergence_threshold_ms: 60_000,
        request_timeout_ms: 500,
        retry: RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        },
        ..TribeConfig::default()
    }
}

pub fn address_of(name: &str) -> String {
    format!("{name}:6000")
}

pub struct NodeBuilder {
    name: String,
    config: TribeConfig,
    local_tasks: Vec<TaskDefinition>,
    store: Option<Arc<dyn TaskStore>>,
}

impl NodeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: tribe_config(),
            local_tasks: Vec::new(),
            store: None,
        }
    }

    pub fn with_config(mut self, config: TribeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_local_task(mut self, definition: TaskDefinition) -> Self {
        self.local_tasks.push(definition);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self, network: &Arc<InMemoryNetwork>) -> TestNode {
        let catalogs = TestCatalogs::new().await;
        let port = self
            .local_tasks
            .into_iter()
            .fold(MockTaskPort::new(), MockTaskPort::with_local);
        let address = address_of(&self.name);

        let tribe = TribeManager::new(
            self.config,
            Member::new(self.name.clone(), address.clone()),
            Arc::new(port.clone()),
            catalogs.plugins.clone(),
            Arc::new(network.transport(&address)),
            self.store,
            Arc::new(MetricsCollector::new()),
        );
        let handler: Weak<dyn GossipHandler> = Arc::<TribeManager>::downgrade(&tribe);
        network.register(&address, handler);

        TestNode {
            name: self.name,
            address,
            tribe,
            port,
            catalogs,
        }
    }
}

pub async fn node(network: &Arc<InMemoryNetwork>, name: &str) -> TestNode {
    NodeBuilder::new(name).build(network).await
}
