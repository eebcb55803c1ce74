//! # pulse-tribe
//!
//! 去中心化的成员关系与 agreement 同步。
//!
//! 节点之间周期性地做推拉式 gossip 交换：先交换摘要（已应用事件的版本向量
//! 与已知成员的心跳计数），再拉取/推送对方缺少的事件。同一发起者的事件
//! 按序应用，不同发起者之间按资源键做 last-writer-wins 合并。
//! 所有存活成员都已应用的事件会被压缩，落后太多的成员改为接收状态快照。

pub mod log;
pub mod membership;
pub mod retry;
pub mod state;
pub mod transport;

mod manager;

pub use manager::{TribeManager, TribeNotice};
pub use membership::{FailureDetectorConfig, MemberSummary, StatusChange};
pub use transport::{
    GossipDelta, GossipDigest, GossipHandler, GossipTransport, InMemoryNetwork, InMemoryTransport,
};
