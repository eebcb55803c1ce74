//! # Pulse API
//!
//! 节点之间的 gossip HTTP 服务与客户端。
//!
//! ## API 端点
//!
//! - `GET /health` - 健康检查
//! - `POST /v1/tribe/gossip/syn` - 交换摘要，请求体与响应体均为 `GossipDigest`
//! - `POST /v1/tribe/gossip/events` - 请求体为版本向量，返回对方缺少的事件
//! - `POST /v1/tribe/gossip/deliver` - 推送事件列表
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use pulse_api::{create_routes, AppState, HttpTransport};
//!
//! let app = create_routes(AppState {
//!     node_name: "node-a".to_string(),
//!     gossip: tribe.clone(),
//! });
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:6000").await?;
//! axum::serve(listener, app).await?;
//! ```
//!
//! ## 错误响应
//!
//! ```json
//! {
//!   "error": {
//!     "message": "协议(agreement)未找到: a",
//!     "type": "NOT_FOUND",
//!     "code": 404,
//!     "timestamp": "2024-01-01T00:00:00Z"
//!   }
//! }
//! ```

pub mod client;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use client::HttpTransport;
pub use error::{ApiError, ApiResult};
pub use routes::{create_routes, AppState};
