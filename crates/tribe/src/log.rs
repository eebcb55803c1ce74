//! gossip 事件日志
//!
//! 按发起者保存已应用的事件，并缓存乱序到达的事件。同一发起者的事件
//! 严格按 `version` 递增顺序交给状态机应用；重复事件直接丢弃，因此
//! 重放是幂等的。
//!
//! 所有存活成员都已应用的事件会被压缩掉，压缩点记在 `base` 中。
//! 对端的版本向量落后于 `base` 时无法再用事件补齐，只能整体发送快照。

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use pulse_core::models::{EventKind, GossipEvent, VersionVector};

/// 每个发起者最多缓存的乱序事件数
pub const DEFAULT_MAX_PENDING: usize = 1024;

#[derive(Debug)]
pub struct EventLog {
    applied: VersionVector,
    base: VersionVector,
    history: BTreeMap<String, Vec<GossipEvent>>,
    pending: HashMap<String, BTreeMap<u64, GossipEvent>>,
    max_pending: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            applied: VersionVector::new(),
            base: VersionVector::new(),
            history: BTreeMap::new(),
            pending: HashMap::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// 已应用事件的版本向量
    pub fn applied(&self) -> &VersionVector {
        &self.applied
    }

    /// 已压缩的前缀
    pub fn base(&self) -> &VersionVector {
        &self.base
    }

    /// 从快照恢复：快照覆盖的事件视为已应用且已压缩
    pub fn restore(&mut self, vector: &VersionVector) {
        self.applied = vector.clone();
        self.base = vector.clone();
        self.history.clear();
        self.pending.clear();
    }

    /// 生成一条本地事件并立即记为已应用
    pub fn emit(&mut self, origin: &str, kind: EventKind, now: DateTime<Utc>) -> GossipEvent {
        let version = self.applied.increment(origin);
        let event = GossipEvent {
            origin: origin.to_string(),
            version,
            clock: self.applied.clone(),
            kind,
            emitted_at: now,
        };
        self.history
            .entry(origin.to_string())
            .or_default()
            .push(event.clone());
        event
    }

    /// 接收一条远端事件，返回按顺序可以应用的事件
    ///
    /// 缺口之后的事件先缓存，缺口补齐时一并返回。缓存满时丢弃版本
    /// 最大的事件，之后的交换会重新拉取。
    pub fn offer(&mut self, event: GossipEvent) -> Vec<GossipEvent> {
        let origin = event.origin.clone();
        let next = self.applied.get(&origin) + 1;

        if event.version < next {
            return Vec::new();
        }
        if event.version > next {
            let buffered = self.pending.entry(origin).or_default();
            buffered.entry(event.version).or_insert(event);
            if buffered.len() > self.max_pending {
                buffered.pop_last();
            }
            return Vec::new();
        }

        let mut ready = vec![event];
        ready.extend(self.drain_pending(&origin, next + 1));
        self.record(origin, ready.clone());
        ready
    }

    /// 并入快照覆盖的版本向量，返回因此可以继续应用的缓存事件
    ///
    /// 调用方负责先把快照的寄存器合并进状态。
    pub fn absorb(&mut self, vector: &VersionVector) -> Vec<GossipEvent> {
        let mut ready = Vec::new();
        for (origin, version) in vector.members() {
            let version = *version;
            if version <= self.applied.get(origin) {
                continue;
            }
            self.applied.set(origin, version);
            if version > self.base.get(origin) {
                self.base.set(origin, version);
            }
            self.history.remove(origin);

            let released = self.drain_pending(origin, version + 1);
            if !released.is_empty() {
                self.record(origin.clone(), released.clone());
                ready.extend(released);
            }
        }
        ready
    }

    /// 对方缺少的全部已应用事件，按发起者、版本排序
    ///
    /// 对方落后于压缩点时返回 `None`。
    pub fn events_since(&self, vector: &VersionVector) -> Option<Vec<GossipEvent>> {
        if !vector.dominates(&self.base) {
            return None;
        }
        let mut events = Vec::new();
        for (origin, history) in &self.history {
            let known = vector.get(origin);
            events.extend(history.iter().filter(|e| e.version > known).cloned());
        }
        Some(events)
    }

    /// 丢弃 `floor` 覆盖的历史事件，返回丢弃的条数
    ///
    /// `floor` 超出本地已应用的部分会被忽略。
    pub fn compact(&mut self, floor: &VersionVector) -> usize {
        let mut floor = floor.clone();
        floor.meet(&self.applied);

        let mut removed = 0;
        for (origin, version) in floor.members() {
            if *version <= self.base.get(origin) {
                continue;
            }
            self.base.set(origin, *version);
            if let Some(history) = self.history.get_mut(origin) {
                let before = history.len();
                history.retain(|e| e.version > *version);
                removed += before - history.len();
                if history.is_empty() {
                    self.history.remove(origin);
                }
            }
        }
        removed
    }

    /// 保存在历史中的事件数
    pub fn history_len(&self) -> usize {
        self.history.values().map(Vec::len).sum()
    }

    /// 等待缺口补齐的事件数
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    /// 取出从 `expected` 开始连续的缓存事件，并清掉已经过时的部分
    fn drain_pending(&mut self, origin: &str, mut expected: u64) -> Vec<GossipEvent> {
        let mut ready = Vec::new();
        if let Some(buffered) = self.pending.get_mut(origin) {
            while let Some(event) = buffered.remove(&expected) {
                ready.push(event);
                expected += 1;
            }
            buffered.retain(|version, _| *version >= expected);
            if buffered.is_empty() {
                self.pending.remove(origin);
            }
        }
        ready
    }

    fn record(&mut self, origin: String, events: Vec<GossipEvent>) {
        if let Some(last) = events.last() {
            self.applied.set(&origin, last.version);
        }
        self.history.entry(origin).or_default().extend(events);
    }
}
