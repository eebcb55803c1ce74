#![allow(dead_code)]

use std::sync::{Arc, Weak};

use pulse::{Node, NodeParts};
use pulse_core::config::{AppConfig, RetryConfig};
use pulse_core::models::Member;
use pulse_core::TaskStore;
use pulse_infrastructure::MetricsCollector;
use pulse_testing_utils::{test_scheduler_config, TestCatalogs};
use pulse_tribe::{GossipHandler, InMemoryNetwork, TribeManager};

pub struct TestNode {
    pub name: String,
    pub address: String,
    pub node: Node,
    pub catalogs: TestCatalogs,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.scheduler = test_scheduler_config();
    config.tribe.request_timeout_ms = 500;
    config.tribe.retry = RetryConfig {
        max_attempts: 1,
        ..RetryConfig::default()
    };
    config
}

pub async fn test_node(
    network: &Arc<InMemoryNetwork>,
    name: &str,
    store: Option<Arc<dyn TaskStore>>,
) -> TestNode {
    let catalogs = TestCatalogs::new().await;
    let address = format!("{name}:6000");
    let node = Node::new(
        &test_config(),
        NodeParts {
            member: Member::new(name, address.clone()),
            plugins: catalogs.plugins.clone(),
            metric_catalog: catalogs.metrics.clone(),
            transport: Arc::new(network.transport(&address)),
            store,
            metrics: Arc::new(MetricsCollector::new()),
        },
    );
    let handler: Weak<dyn GossipHandler> = Arc::<TribeManager>::downgrade(node.tribe());
    network.register(&address, handler);

    TestNode {
        name: name.to_string(),
        address,
        node,
        catalogs,
    }
}
