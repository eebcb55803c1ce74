use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 两个版本向量的因果关系
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Causality {
    Before,
    After,
    Equal,
    Concurrent,
}

/// 版本向量：成员名 -> 单调递增计数器
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector(BTreeMap<String, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, member: &str) -> u64 {
        self.0.get(member).copied().unwrap_or(0)
    }

    pub fn set(&mut self, member: &str, version: u64) {
        self.0.insert(member.to_string(), version);
    }

    /// 自增指定成员的计数器并返回新值
    pub fn increment(&mut self, member: &str) -> u64 {
        let entry = self.0.entry(member.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// 逐项取最大值
    pub fn merge(&mut self, other: &VersionVector) {
        for (member, version) in &other.0 {
            let entry = self.0.entry(member.clone()).or_insert(0);
            if *version > *entry {
                *entry = *version;
            }
        }
    }

    /// 逐项取最小值，只在一方出现的成员按0处理
    pub fn meet(&mut self, other: &VersionVector) {
        for (member, version) in self.0.iter_mut() {
            *version = (*version).min(other.get(member));
        }
        self.0.retain(|_, version| *version > 0);
    }

    pub fn compare(&self, other: &VersionVector) -> Causality {
        let mut less = false;
        let mut greater = false;

        for member in self.0.keys().chain(other.0.keys()) {
            match self.get(member).cmp(&other.get(member)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
            if less && greater {
                return Causality::Concurrent;
            }
        }

        match (less, greater) {
            (false, false) => Causality::Equal,
            (true, false) => Causality::Before,
            (false, true) => Causality::After,
            (true, true) => Causality::Concurrent,
        }
    }

    /// self 包含 other 的全部信息
    pub fn dominates(&self, other: &VersionVector) -> bool {
        matches!(self.compare(other), Causality::After | Causality::Equal)
    }

    pub fn members(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| *v == 0)
    }
}

impl FromIterator<(String, u64)> for VersionVector {
    fn from_iter<T: IntoIterator<Item = (String, u64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
