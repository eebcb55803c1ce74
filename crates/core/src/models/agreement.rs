use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::clock::VersionVector;
use super::plugin::PluginKey;
use super::task::{TaskDefinition, TaskId};
use crate::errors::{PulseError, PulseResult};

/// Agreement：共享同一组任务和插件的成员集合，是复制的基本单位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub name: String,
    pub tasks: BTreeMap<TaskId, TaskDefinition>,
    pub plugins: BTreeSet<PluginKey>,
    pub members: BTreeSet<String>,
}

impl Agreement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: BTreeMap::new(),
            plugins: BTreeSet::new(),
            members: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// 校验 agreement 名称：非空、最长64字符、仅允许字母数字及 `-` `_` `.`
pub fn validate_agreement_name(name: &str) -> PulseResult<()> {
    if name.is_empty() {
        return Err(PulseError::validation("agreement 名称不能为空"));
    }
    if name.len() > 64 {
        return Err(PulseError::validation("agreement 名称不能超过64个字符"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(PulseError::validation(format!(
            "agreement 名称包含非法字符: {name}"
        )));
    }
    Ok(())
}

/// gossip 事件类型及负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Join { member: String, agreement: String },
    Leave { member: String, agreement: String },
    AddTask { agreement: String, task: TaskDefinition },
    RemoveTask { agreement: String, task_id: TaskId },
    AddPlugin { agreement: String, plugin: PluginKey },
    RemovePlugin { agreement: String, plugin: PluginKey },
    AddAgreement { name: String },
    RemoveAgreement { name: String },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Join { .. } => "join",
            EventKind::Leave { .. } => "leave",
            EventKind::AddTask { .. } => "add_task",
            EventKind::RemoveTask { .. } => "remove_task",
            EventKind::AddPlugin { .. } => "add_plugin",
            EventKind::RemovePlugin { .. } => "remove_plugin",
            EventKind::AddAgreement { .. } => "add_agreement",
            EventKind::RemoveAgreement { .. } => "remove_agreement",
        }
    }
}

/// gossip 事件
///
/// `version` 是发起成员自身的事件序号（同一发起者严格递增），
/// `clock` 是发起时发起者已知的版本向量（含本事件），用于跨成员冲突裁决。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipEvent {
    pub origin: String,
    pub version: u64,
    pub clock: VersionVector,
    pub kind: EventKind,
    pub emitted_at: DateTime<Utc>,
}
