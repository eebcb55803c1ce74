//! gossip 传输接口
//!
//! 一次推拉交换分三步：`syn` 交换摘要，`pull` 拉取对方多出的部分，
//! `push` 推送自己多出的部分。多出的部分以 [`GossipDelta`] 传输：
//! 通常只有事件，接收方落后于发送方的压缩点时附带完整快照。[`GossipHandler`] 是节点对外提供的服务端，
//! [`GossipTransport`] 是客户端；HTTP 实现在 API crate 中，
//! [`InMemoryNetwork`] 用于同进程内的多节点测试。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pulse_core::models::{GossipEvent, TribeSnapshot, VersionVector};
use pulse_core::{PulseError, PulseResult};

use crate::membership::MemberSummary;

/// gossip 摘要：已应用事件的版本向量 + 已知成员的心跳计数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipDigest {
    pub from: String,
    pub address: String,
    pub vector: VersionVector,
    pub members: Vec<MemberSummary>,
}

/// 一次 pull/push 传输的内容
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GossipDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<TribeSnapshot>,
    #[serde(default)]
    pub events: Vec<GossipEvent>,
}

impl GossipDelta {
    pub fn events(events: Vec<GossipEvent>) -> Self {
        Self {
            snapshot: None,
            events,
        }
    }

    pub fn snapshot(snapshot: TribeSnapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            events: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.events.is_empty()
    }
}

/// 节点对外提供的 gossip 服务
#[async_trait]
pub trait GossipHandler: Send + Sync {
    /// 合并对方摘要，返回本节点摘要
    async fn handle_syn(&self, digest: GossipDigest) -> PulseResult<GossipDigest>;

    /// 对方版本向量之后的增量
    async fn events_since(&self, vector: &VersionVector) -> PulseResult<GossipDelta>;

    async fn deliver(&self, delta: GossipDelta) -> PulseResult<()>;
}

/// 访问远端节点的 gossip 客户端
///
/// 不可达、超时等错误统一返回 [`PulseError::Network`]，由调用方决定是否重试。
#[async_trait]
pub trait GossipTransport: Send + Sync {
    async fn syn(&self, address: &str, digest: GossipDigest) -> PulseResult<GossipDigest>;

    async fn pull(&self, address: &str, since: &VersionVector) -> PulseResult<GossipDelta>;

    async fn push(&self, address: &str, delta: GossipDelta) -> PulseResult<()>;
}

/// 进程内模拟网络，支持隔离单个节点
#[derive(Default)]
pub struct InMemoryNetwork {
    nodes: RwLock<HashMap<String, Weak<dyn GossipHandler>>>,
    isolated: RwLock<HashSet<String>>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, address: &str, handler: Weak<dyn GossipHandler>) {
        self.nodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.to_string(), handler);
    }

    pub fn unregister(&self, address: &str) {
        self.nodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(address);
    }

    /// 隔离节点：进出该地址的请求都会失败
    pub fn isolate(&self, address: &str) {
        self.isolated
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.to_string());
    }

    pub fn heal(&self, address: &str) {
        self.isolated
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(address);
    }

    /// 为 `local` 地址创建客户端
    pub fn transport(self: &Arc<Self>, local: &str) -> InMemoryTransport {
        InMemoryTransport {
            network: self.clone(),
            local: local.to_string(),
        }
    }

    fn route(&self, from: &str, to: &str) -> PulseResult<Arc<dyn GossipHandler>> {
        {
            let isolated = self.isolated.read().unwrap_or_else(|e| e.into_inner());
            if isolated.contains(from) || isolated.contains(to) {
                return Err(PulseError::Network(format!("{from} -> {to} 网络不可达")));
            }
        }
        self.nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(to)
            .and_then(Weak::upgrade)
            .ok_or_else(|| PulseError::Network(format!("连接被拒绝: {to}")))
    }
}

pub struct InMemoryTransport {
    network: Arc<InMemoryNetwork>,
    local: String,
}

#[async_trait]
impl GossipTransport for InMemoryTransport {
    async fn syn(&self, address: &str, digest: GossipDigest) -> PulseResult<GossipDigest> {
        let handler = self.network.route(&self.local, address)?;
        handler.handle_syn(digest).await
    }

    async fn pull(&self, address: &str, since: &VersionVector) -> PulseResult<GossipDelta> {
        let handler = self.network.route(&self.local, address)?;
        handler.events_since(since).await
    }

    async fn push(&self, address: &str, delta: GossipDelta) -> PulseResult<()> {
        let handler = self.network.route(&self.local, address)?;
        handler.deliver(delta).await
    }
}
