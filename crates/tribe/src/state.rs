//! 复制的 agreement 状态
//!
//! 每个资源键（agreement、agreement 内的任务/插件、成员归属）对应一个
//! last-writer-wins 寄存器。事件的版本向量决定先后；并发写入按
//! [`TieBreakRule`] 比较发起者名称裁决。这一规则是确定性的，但不保证
//! 因果正确，裁决丢弃了不同的值时会产生一条分歧提示。
//!
//! 寄存器可以整体导出为快照并按同样的规则合并，合并与逐条重放事件
//! 得到相同的结果。

use std::collections::{BTreeMap, HashSet};

use pulse_core::config::TieBreakRule;
use pulse_core::models::{
    Agreement, Causality, EventKind, GossipEvent, RegisterEntry, RegisterValue as Value,
    ResourceKey, VersionVector,
};

/// 写入者身份：版本向量 + 发起者
#[derive(Debug, Clone)]
struct Stamp {
    clock: VersionVector,
    origin: String,
}

impl Stamp {
    /// (是否覆盖, 是否靠发起者名称裁决)
    fn supersedes(&self, current: &Stamp, rule: TieBreakRule) -> (bool, bool) {
        match self.clock.compare(&current.clock) {
            Causality::After => (true, false),
            Causality::Before => (false, false),
            Causality::Equal | Causality::Concurrent => {
                let wins = match rule {
                    TieBreakRule::HighestOrigin => self.origin > current.origin,
                    TieBreakRule::LowestOrigin => self.origin < current.origin,
                };
                (wins, true)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Register {
    stamp: Stamp,
    value: Value,
}

/// 并发写入裁决丢弃了不同的值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieBreak {
    pub key: ResourceKey,
    pub winner: String,
    pub loser: String,
}

impl std::fmt::Display for TieBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} 存在并发写入，保留 {} 的值，丢弃 {} 的值",
            self.key, self.winner, self.loser
        )
    }
}

#[derive(Debug, Default)]
pub struct AgreementState {
    registers: BTreeMap<ResourceKey, Register>,
    rule: TieBreakRule,
}

impl AgreementState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(rule: TieBreakRule) -> Self {
        Self {
            registers: BTreeMap::new(),
            rule,
        }
    }

    /// 应用一条事件，返回产生的并发裁决
    pub fn apply(&mut self, event: &GossipEvent) -> Vec<TieBreak> {
        let stamp = Stamp {
            clock: event.clock.clone(),
            origin: event.origin.clone(),
        };
        let mut ties = Vec::new();

        match &event.kind {
            EventKind::AddAgreement { name } => {
                self.write(ResourceKey::Agreement(name.clone()), Value::Present, &stamp, &mut ties);
            }
            EventKind::RemoveAgreement { name } => {
                self.write(ResourceKey::Agreement(name.clone()), Value::Absent, &stamp, &mut ties);
                // 同时清除该 agreement 下的任务、插件和成员归属，避免重建同名 agreement 时复活
                let nested: Vec<ResourceKey> = self
                    .registers
                    .iter()
                    .filter(|(key, register)| {
                        key.agreement() == Some(name.as_str())
                            || matches!(&register.value, Value::Member(a) if a == name)
                    })
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in nested {
                    self.write(key, Value::Absent, &stamp, &mut ties);
                }
            }
            EventKind::Join { member, agreement } => {
                self.write(
                    ResourceKey::Membership(member.clone()),
                    Value::Member(agreement.clone()),
                    &stamp,
                    &mut ties,
                );
            }
            EventKind::Leave { member, .. } => {
                self.write(ResourceKey::Membership(member.clone()), Value::Absent, &stamp, &mut ties);
            }
            EventKind::AddTask { agreement, task } => {
                self.write(
                    ResourceKey::Task {
                        agreement: agreement.clone(),
                        id: task.id.clone(),
                    },
                    Value::Task(task.clone()),
                    &stamp,
                    &mut ties,
                );
            }
            EventKind::RemoveTask { agreement, task_id } => {
                self.write(
                    ResourceKey::Task {
                        agreement: agreement.clone(),
                        id: task_id.clone(),
                    },
                    Value::Absent,
                    &stamp,
                    &mut ties,
                );
            }
            EventKind::AddPlugin { agreement, plugin } => {
                self.write(
                    ResourceKey::Plugin {
                        agreement: agreement.clone(),
                        plugin: plugin.clone(),
                    },
                    Value::Present,
                    &stamp,
                    &mut ties,
                );
            }
            EventKind::RemovePlugin { agreement, plugin } => {
                self.write(
                    ResourceKey::Plugin {
                        agreement: agreement.clone(),
                        plugin: plugin.clone(),
                    },
                    Value::Absent,
                    &stamp,
                    &mut ties,
                );
            }
        }

        ties
    }

    fn write(&mut self, key: ResourceKey, value: Value, stamp: &Stamp, ties: &mut Vec<TieBreak>) {
        let Some(current) = self.registers.get_mut(&key) else {
            self.registers.insert(
                key,
                Register {
                    stamp: stamp.clone(),
                    value,
                },
            );
            return;
        };

        let (wins, tie_broken) = stamp.supersedes(&current.stamp, self.rule);
        if tie_broken && current.value != value {
            let (winner, loser) = if wins {
                (stamp.origin.clone(), current.stamp.origin.clone())
            } else {
                (current.stamp.origin.clone(), stamp.origin.clone())
            };
            ties.push(TieBreak {
                key: key.clone(),
                winner,
                loser,
            });
        }
        if wins {
            current.stamp = stamp.clone();
            current.value = value;
        }
    }

    /// 导出全部寄存器，用于快照
    pub fn entries(&self) -> Vec<RegisterEntry> {
        self.registers
            .iter()
            .map(|(key, register)| RegisterEntry {
                key: key.clone(),
                clock: register.stamp.clock.clone(),
                origin: register.stamp.origin.clone(),
                value: register.value.clone(),
            })
            .collect()
    }

    /// 按寄存器合并快照，规则与应用事件相同
    pub fn merge(&mut self, entries: &[RegisterEntry]) -> Vec<TieBreak> {
        let mut ties = Vec::new();
        for entry in entries {
            let stamp = Stamp {
                clock: entry.clock.clone(),
                origin: entry.origin.clone(),
            };
            self.write(entry.key.clone(), entry.value.clone(), &stamp, &mut ties);
        }
        ties
    }

    pub fn has_agreement(&self, name: &str) -> bool {
        matches!(
            self.registers.get(&ResourceKey::Agreement(name.to_string())),
            Some(Register { value: Value::Present, .. })
        )
    }

    /// 成员当前所属的 agreement（agreement 已删除时视为不属于任何 agreement）
    pub fn membership(&self, member: &str) -> Option<String> {
        match self.registers.get(&ResourceKey::Membership(member.to_string())) {
            Some(Register {
                value: Value::Member(agreement),
                ..
            }) if self.has_agreement(agreement) => Some(agreement.clone()),
            _ => None,
        }
    }

    /// 物化全部 agreement，`excluded` 中的成员不计入成员集合
    pub fn agreements(&self, excluded: &HashSet<String>) -> BTreeMap<String, Agreement> {
        let mut agreements: BTreeMap<String, Agreement> = BTreeMap::new();
        for (key, register) in &self.registers {
            if let (ResourceKey::Agreement(name), Value::Present) = (key, &register.value) {
                agreements.insert(name.clone(), Agreement::new(name.clone()));
            }
        }

        for (key, register) in &self.registers {
            match (key, &register.value) {
                (ResourceKey::Task { agreement, id }, Value::Task(task)) => {
                    if let Some(entry) = agreements.get_mut(agreement) {
                        entry.tasks.insert(id.clone(), task.clone());
                    }
                }
                (ResourceKey::Plugin { agreement, plugin }, Value::Present) => {
                    if let Some(entry) = agreements.get_mut(agreement) {
                        entry.plugins.insert(plugin.clone());
                    }
                }
                (ResourceKey::Membership(member), Value::Member(agreement)) => {
                    if excluded.contains(member) {
                        continue;
                    }
                    if let Some(entry) = agreements.get_mut(agreement) {
                        entry.members.insert(member.clone());
                    }
                }
                _ => {}
            }
        }

        agreements
    }

    pub fn agreement(&self, name: &str, excluded: &HashSet<String>) -> Option<Agreement> {
        if !self.has_agreement(name) {
            return None;
        }
        self.agreements(excluded).remove(name)
    }
}
