use axum::{extract::State, Json};
use tracing::debug;

use pulse_core::models::VersionVector;
use pulse_tribe::{GossipDelta, GossipDigest};

use crate::error::ApiResult;
use crate::routes::AppState;

/// 合并对端摘要并返回本节点摘要
pub async fn syn(
    State(state): State<AppState>,
    Json(digest): Json<GossipDigest>,
) -> ApiResult<Json<GossipDigest>> {
    debug!(peer = %digest.from, "收到 gossip SYN");
    Ok(Json(state.gossip.handle_syn(digest).await?))
}

/// 返回对端版本向量之后的增量
pub async fn events_since(
    State(state): State<AppState>,
    Json(vector): Json<VersionVector>,
) -> ApiResult<Json<GossipDelta>> {
    Ok(Json(state.gossip.events_since(&vector).await?))
}

pub async fn deliver(
    State(state): State<AppState>,
    Json(delta): Json<GossipDelta>,
) -> ApiResult<Json<serde_json::Value>> {
    let received = delta.events.len();
    let snapshot = delta.snapshot.is_some();
    state.gossip.deliver(delta).await?;
    Ok(Json(serde_json::json!({ "received": received, "snapshot": snapshot })))
}
