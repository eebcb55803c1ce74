use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use pulse_core::models::VersionVector;
use pulse_core::{PulseError, PulseResult};
use pulse_tribe::{GossipDelta, GossipDigest, GossipTransport};

use crate::routes::{DELIVER_PATH, EVENTS_PATH, SYN_PATH};

/// 基于 HTTP 的 gossip 客户端
///
/// 地址形如 `host:port`，未带协议时补 `http://`。连接失败、超时以及
/// 5xx 响应映射为可重试的网络错误，其他非成功响应不重试。
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> PulseResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| PulseError::Internal(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { http_client })
    }

    fn url(address: &str, path: &str) -> String {
        if address.starts_with("http://") || address.starts_with("https://") {
            format!("{}{path}", address.trim_end_matches('/'))
        } else {
            format!("http://{address}{path}")
        }
    }

    async fn post<B, R>(&self, address: &str, path: &str, body: &B) -> PulseResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = Self::url(address, path);
        debug!(url = %url, "发送 gossip 请求");

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| PulseError::Network(format!("{url} 请求失败: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| PulseError::Serialization(format!("{url} 响应解析失败: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(PulseError::Network(format!("{url} 返回 HTTP {status} - {body}")))
        } else {
            Err(PulseError::Internal(format!("{url} 返回 HTTP {status} - {body}")))
        }
    }
}

#[async_trait]
impl GossipTransport for HttpTransport {
    async fn syn(&self, address: &str, digest: GossipDigest) -> PulseResult<GossipDigest> {
        self.post(address, SYN_PATH, &digest).await
    }

    async fn pull(&self, address: &str, since: &VersionVector) -> PulseResult<GossipDelta> {
        self.post(address, EVENTS_PATH, since).await
    }

    async fn push(&self, address: &str, delta: GossipDelta) -> PulseResult<()> {
        let _: serde_json::Value = self.post(address, DELIVER_PATH, &delta).await?;
        Ok(())
    }
}
