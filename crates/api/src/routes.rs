use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use pulse_tribe::GossipHandler;

use crate::handlers::{
    gossip::{deliver, events_since, syn},
    health::health_check,
};
use crate::middleware::{request_logging, trace_layer};

/// gossip 服务状态
#[derive(Clone)]
pub struct AppState {
    pub node_name: String,
    pub gossip: Arc<dyn GossipHandler>,
}

pub const SYN_PATH: &str = "/v1/tribe/gossip/syn";
pub const EVENTS_PATH: &str = "/v1/tribe/gossip/events";
pub const DELIVER_PATH: &str = "/v1/tribe/gossip/deliver";

/// 创建 gossip 路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(SYN_PATH, post(syn))
        .route(EVENTS_PATH, post(events_since))
        .route(DELIVER_PATH, post(deliver))
        .layer(axum::middleware::from_fn(request_logging))
        .layer(trace_layer())
        .with_state(state)
}
