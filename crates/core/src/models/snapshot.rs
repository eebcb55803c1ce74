use serde::{Deserialize, Serialize};

use super::clock::VersionVector;
use super::plugin::PluginKey;
use super::task::{TaskDefinition, TaskId};

/// 复制状态中一个 last-writer-wins 寄存器的键
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKey {
    Agreement(String),
    Task { agreement: String, id: TaskId },
    Plugin { agreement: String, plugin: PluginKey },
    Membership(String),
}

impl ResourceKey {
    /// 嵌套在某个 agreement 之下的键返回该 agreement 名称
    pub fn agreement(&self) -> Option<&str> {
        match self {
            ResourceKey::Task { agreement, .. } | ResourceKey::Plugin { agreement, .. } => {
                Some(agreement)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterValue {
    Present,
    Absent,
    Task(TaskDefinition),
    Member(String),
}

/// 寄存器的当前值及写入者身份（写入时的版本向量 + 发起者）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterEntry {
    pub key: ResourceKey,
    pub clock: VersionVector,
    pub origin: String,
    pub value: RegisterValue,
}

/// 复制状态快照
///
/// `registers` 恰好反映 `vector` 覆盖的全部事件。快照既用于持久化，
/// 也用于给落后于已压缩日志的对端整体补齐状态。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TribeSnapshot {
    pub vector: VersionVector,
    pub registers: Vec<RegisterEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_json_shape() {
        let mut vector = VersionVector::new();
        vector.set("n1", 3);
        let snapshot = TribeSnapshot {
            vector,
            registers: vec![RegisterEntry {
                key: ResourceKey::Membership("n2".into()),
                clock: VersionVector::new(),
                origin: "n1".into(),
                value: RegisterValue::Member("a".into()),
            }],
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["vector"]["n1"], 3);
        assert_eq!(json["registers"][0]["key"]["membership"], "n2");
        assert_eq!(json["registers"][0]["value"]["member"], "a");

        let back: TribeSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
