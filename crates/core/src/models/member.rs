use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 成员在本节点视图中的存活状态
///
/// ```text
/// Unknown → Alive → Suspect → Dead
///             ▲        │        │
///             └────────┴────────┘  (重新收到心跳)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberStatus {
    Unknown,
    Alive,
    Suspect,
    Dead,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Unknown => "Unknown",
            MemberStatus::Alive => "Alive",
            MemberStatus::Suspect => "Suspect",
            MemberStatus::Dead => "Dead",
        }
    }

    /// 可以作为 gossip 交换对象的状态
    pub fn is_reachable(&self) -> bool {
        matches!(self, MemberStatus::Alive | MemberStatus::Suspect | MemberStatus::Unknown)
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 集群成员
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    /// gossip 通信地址，例如 `127.0.0.1:6000`
    pub address: String,
    pub tags: BTreeMap<String, String>,
    /// 至多属于一个 agreement
    pub agreement: Option<String>,
    pub status: MemberStatus,
    /// 成员自身维护的心跳计数
    pub heartbeat: u64,
    pub last_heard_at: Option<DateTime<Utc>>,
    pub suspect_since: Option<DateTime<Utc>>,
    /// 连续未观察到心跳增长的检测周期数
    pub missed_heartbeats: u32,
}

impl Member {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            tags: BTreeMap::new(),
            agreement: None,
            status: MemberStatus::Unknown,
            heartbeat: 0,
            last_heard_at: None,
            suspect_since: None,
            missed_heartbeats: 0,
        }
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }
}
