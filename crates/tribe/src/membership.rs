//! 成员表与失效检测
//!
//! 每个节点按心跳周期自增自己的计数器，并在 gossip 摘要里携带已知成员
//! 的计数器。观察到更大的计数器即视为“收到了该成员的消息”。检测只在
//! 本地进行，不同节点对同一成员的判断可以暂时不一致。

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use pulse_core::config::TribeConfig;
use pulse_core::models::{Member, MemberStatus};

/// 失效检测配置
#[derive(Debug, Clone)]
pub struct FailureDetectorConfig {
    /// 连续错过多少个心跳周期后标记为 Suspect
    pub suspect_after_missed: u32,
    /// Suspect 持续多久后标记为 Dead
    pub dead_timeout: Duration,
}

impl Default for FailureDetectorConfig {
    fn default() -> Self {
        Self {
            suspect_after_missed: 3,
            dead_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&TribeConfig> for FailureDetectorConfig {
    fn from(config: &TribeConfig) -> Self {
        Self {
            suspect_after_missed: config.suspect_after_missed,
            dead_timeout: config.dead_timeout(),
        }
    }
}

/// 摘要中携带的成员信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub heartbeat: u64,
}

/// 成员状态变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub member: String,
    pub from: MemberStatus,
    pub to: MemberStatus,
}

#[derive(Debug)]
pub struct MembershipTable {
    local: String,
    members: BTreeMap<String, Member>,
    config: FailureDetectorConfig,
}

impl MembershipTable {
    pub fn new(local: Member, config: FailureDetectorConfig) -> Self {
        let name = local.name.clone();
        let mut local = local;
        local.status = MemberStatus::Alive;
        local.last_heard_at = Some(Utc::now());

        let mut members = BTreeMap::new();
        members.insert(name.clone(), local);
        Self {
            local: name,
            members,
            config,
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    pub fn list(&self) -> Vec<Member> {
        self.members.values().cloned().collect()
    }

    /// 自增本节点心跳计数
    pub fn beat(&mut self, now: DateTime<Utc>) -> u64 {
        let Some(local) = self.members.get_mut(&self.local) else {
            return 0;
        };
        local.heartbeat += 1;
        local.last_heard_at = Some(now);
        local.heartbeat
    }

    pub fn summaries(&self) -> Vec<MemberSummary> {
        self.members
            .values()
            .filter(|m| m.status != MemberStatus::Dead)
            .map(|m| MemberSummary {
                name: m.name.clone(),
                address: m.address.clone(),
                tags: m.tags.clone(),
                heartbeat: m.heartbeat,
            })
            .collect()
    }

    /// 合并摘要中的一条成员信息
    ///
    /// 首次得知的成员状态为 Unknown；计数器增长才算收到消息。
    pub fn observe(&mut self, summary: &MemberSummary, now: DateTime<Utc>) -> Option<StatusChange> {
        if summary.name == self.local {
            return None;
        }

        let Some(member) = self.members.get_mut(&summary.name) else {
            debug!(member = %summary.name, address = %summary.address, "发现新成员");
            let mut member = Member::new(summary.name.clone(), summary.address.clone())
                .with_tags(summary.tags.clone());
            member.heartbeat = summary.heartbeat;
            self.members.insert(summary.name.clone(), member);
            return None;
        };

        member.address = summary.address.clone();
        member.tags = summary.tags.clone();
        if summary.heartbeat <= member.heartbeat {
            return None;
        }
        member.heartbeat = summary.heartbeat;
        Self::heard(member, now)
    }

    /// 与该成员直接完成了一次交换
    pub fn touch(&mut self, name: &str, address: &str, now: DateTime<Utc>) -> Option<StatusChange> {
        if name == self.local {
            return None;
        }
        let member = self
            .members
            .entry(name.to_string())
            .or_insert_with(|| Member::new(name, address));
        member.address = address.to_string();
        Self::heard(member, now)
    }

    fn heard(member: &mut Member, now: DateTime<Utc>) -> Option<StatusChange> {
        member.last_heard_at = Some(now);
        member.missed_heartbeats = 0;
        member.suspect_since = None;

        let from = member.status;
        if from == MemberStatus::Alive {
            return None;
        }
        member.status = MemberStatus::Alive;
        if from != MemberStatus::Unknown {
            info!(member = %member.name, from = %from, "成员恢复存活");
        }
        Some(StatusChange {
            member: member.name.clone(),
            from,
            to: MemberStatus::Alive,
        })
    }

    /// 一个心跳周期的检测
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<StatusChange> {
        let dead_timeout = chrono::Duration::from_std(self.config.dead_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let mut changes = Vec::new();

        for member in self.members.values_mut() {
            if member.name == self.local {
                continue;
            }
            let from = member.status;
            match from {
                MemberStatus::Unknown | MemberStatus::Alive => {
                    member.missed_heartbeats += 1;
                    if member.missed_heartbeats >= self.config.suspect_after_missed {
                        member.status = MemberStatus::Suspect;
                        member.suspect_since = Some(now);
                        warn!(
                            member = %member.name,
                            missed = member.missed_heartbeats,
                            "成员心跳超时，标记为Suspect"
                        );
                    }
                }
                MemberStatus::Suspect => {
                    member.missed_heartbeats += 1;
                    let since = member.suspect_since.unwrap_or(now);
                    if now - since >= dead_timeout {
                        member.status = MemberStatus::Dead;
                        warn!(member = %member.name, "成员Suspect超时，标记为Dead");
                    }
                }
                MemberStatus::Dead => {}
            }
            if member.status != from {
                changes.push(StatusChange {
                    member: member.name.clone(),
                    from,
                    to: member.status,
                });
            }
        }

        changes
    }

    /// 本地判定为 Dead 的成员
    pub fn dead_members(&self) -> impl Iterator<Item = &str> {
        self.members
            .values()
            .filter(|m| m.status == MemberStatus::Dead)
            .map(|m| m.name.as_str())
    }

    /// 可以作为 gossip 对象的远端成员地址
    pub fn peer_addresses(&self) -> Vec<String> {
        self.members
            .values()
            .filter(|m| m.name != self.local && m.status.is_reachable())
            .map(|m| m.address.clone())
            .collect()
    }

    pub fn is_known_address(&self, address: &str) -> bool {
        self.members.values().any(|m| m.address == address)
    }

    pub fn count(&self, status: MemberStatus) -> usize {
        self.members.values().filter(|m| m.status == status).count()
    }
}
