#![allow(dead_code)]

use std::sync::Arc;

use pulse_api::{create_routes, AppState};
use pulse_core::config::{RetryConfig, TribeConfig};
use pulse_core::models::Member;
use pulse_infrastructure::MetricsCollector;
use pulse_testing_utils::{MockTaskPort, TestCatalogs};
use pulse_tribe::{GossipTransport, InMemoryNetwork, TribeManager};

pub fn tribe_config() -> TribeConfig {
    TribeConfig {
        request_timeout_ms: 1_000,
        retry: RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        },
        ..TribeConfig::default()
    }
}

pub async fn tribe_with(
    name: &str,
    address: &str,
    transport: Arc<dyn GossipTransport>,
) -> Arc<TribeManager> {
    let catalogs = TestCatalogs::new().await;
    TribeManager::new(
        tribe_config(),
        Member::new(name.to_string(), address.to_string()),
        Arc::new(MockTaskPort::new()),
        catalogs.plugins.clone(),
        transport,
        None,
        Arc::new(MetricsCollector::new()),
    )
}

/// 不会真正发出请求的节点
pub async fn offline_tribe(name: &str) -> Arc<TribeManager> {
    let network = InMemoryNetwork::new();
    let address = format!("{name}:6000");
    let transport = Arc::new(network.transport(&address));
    tribe_with(name, &address, transport).await
}

pub fn app(tribe: &Arc<TribeManager>) -> axum::Router {
    create_routes(AppState {
        node_name: tribe.local_name().to_string(),
        gossip: tribe.clone(),
    })
}
