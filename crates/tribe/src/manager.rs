//! 部落(tribe)管理器
//!
//! 负责 gossip 成员关系与 agreement 状态同步：
//! - 本地命令先完整校验，再生成事件并应用到本地状态，之后由 gossip 传播；
//! - 远端事件经事件日志排序去重后应用，并发写入按 LWW 裁决；
//! - 本节点所属 agreement 的任务和插件通过 [`LocalTaskPort`] 与
//!   [`PluginCatalog`] 落到本地，tribe 从不直接修改任务状态；
//! - 复制状态以快照形式持久化，重启后本节点的事件计数从快照继续，
//!   所有存活成员都已应用的事件在心跳周期中压缩。
//!
//! 锁顺序固定为“本地视图锁 → 状态锁”，调用任务端口和插件目录时
//! 不持有状态锁。

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use tokio::sync::{broadcast, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use pulse_core::config::TribeConfig;
use pulse_core::models::{
    validate_agreement_name, Agreement, EventKind, GossipEvent, Member, MemberStatus, PluginKey,
    TaskDefinition, TaskId, TribeSnapshot, VersionVector,
};
use pulse_core::{LocalTaskPort, PluginCatalog, PulseError, PulseResult, TaskStore};
use pulse_infrastructure::MetricsCollector;

use crate::log::EventLog;
use crate::membership::{FailureDetectorConfig, MembershipTable, StatusChange};
use crate::retry::with_retry;
use crate::state::AgreementState;
use crate::transport::{GossipDelta, GossipDigest, GossipHandler, GossipTransport};

const NOTICE_CAPACITY: usize = 256;

/// tribe 对外广播的提示
#[derive(Debug, Clone, PartialEq)]
pub enum TribeNotice {
    /// 集群视图分歧告警，不影响运行
    Divergence { reason: String },
    MemberStatusChanged {
        member: String,
        from: MemberStatus,
        to: MemberStatus,
    },
}

struct TribeState {
    log: EventLog,
    agreements: AgreementState,
    members: MembershipTable,
    /// 对端摘要与本地不一致的起始时间
    disagreeing_since: HashMap<String, DateTime<Utc>>,
    warned: HashSet<String>,
    /// 各对端最近一次摘要中的版本向量
    peer_vectors: HashMap<String, VersionVector>,
}

impl TribeState {
    fn snapshot(&self) -> TribeSnapshot {
        TribeSnapshot {
            vector: self.log.applied().clone(),
            registers: self.agreements.entries(),
        }
    }

    /// 对方版本向量之后的增量，对方落后于压缩点时给出完整快照
    fn delta_since(&self, vector: &VersionVector) -> GossipDelta {
        match self.log.events_since(vector) {
            Some(events) => GossipDelta::events(events),
            None => GossipDelta::snapshot(self.snapshot()),
        }
    }

    /// 本节点与所有未失效成员都已应用的版本向量
    ///
    /// 尚未收到过摘要的成员按空向量计算，此时不会压缩任何事件。
    fn compaction_floor(&self, local: &str) -> VersionVector {
        let mut floor = self.log.applied().clone();
        for member in self.members.list() {
            if member.name == local || member.status == MemberStatus::Dead {
                continue;
            }
            match self.peer_vectors.get(&member.name) {
                Some(vector) => floor.meet(vector),
                None => return VersionVector::new(),
            }
        }
        floor
    }

    fn excluded(&self) -> HashSet<String> {
        self.members.dead_members().map(str::to_string).collect()
    }

    fn agreement(&self, name: &str) -> PulseResult<Agreement> {
        self.agreements
            .agreement(name, &self.excluded())
            .ok_or_else(|| PulseError::AgreementNotFound {
                name: name.to_string(),
            })
    }
}

/// 已按 agreement 落地的任务
struct AdoptedTask {
    agreement: String,
    definition: TaskDefinition,
}

/// 本节点代表 agreement 落地的任务与插件
#[derive(Default)]
struct LocalView {
    adopted: HashMap<TaskId, AdoptedTask>,
    /// 已确保可用的插件 -> 是否由 tribe 加载
    plugins: HashMap<PluginKey, bool>,
    rejected_tasks: HashSet<TaskId>,
    rejected_plugins: HashSet<PluginKey>,
}

pub struct TribeManager {
    config: TribeConfig,
    local: String,
    address: String,
    state: Mutex<TribeState>,
    view: Mutex<LocalView>,
    tasks: Arc<dyn LocalTaskPort>,
    plugins: Arc<dyn PluginCatalog>,
    transport: Arc<dyn GossipTransport>,
    store: Option<Arc<dyn TaskStore>>,
    metrics: Arc<MetricsCollector>,
    notices: broadcast::Sender<TribeNotice>,
    exchanges: Arc<Semaphore>,
    running: Arc<RwLock<bool>>,
    loops: StdMutex<Vec<JoinHandle<()>>>,
}

impl TribeManager {
    pub fn new(
        config: TribeConfig,
        local: Member,
        tasks: Arc<dyn LocalTaskPort>,
        plugins: Arc<dyn PluginCatalog>,
        transport: Arc<dyn GossipTransport>,
        store: Option<Arc<dyn TaskStore>>,
        metrics: Arc<MetricsCollector>,
    ) -> Arc<Self> {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let rule = config.tie_break;
        let name = local.name.clone();
        let address = local.address.clone();
        let members = MembershipTable::new(local, FailureDetectorConfig::from(&config));
        let exchanges = Arc::new(Semaphore::new(config.max_concurrent_exchanges));

        Arc::new(Self {
            config,
            local: name,
            address,
            state: Mutex::new(TribeState {
                log: EventLog::new(),
                agreements: AgreementState::with_rule(rule),
                members,
                disagreeing_since: HashMap::new(),
                warned: HashSet::new(),
                peer_vectors: HashMap::new(),
            }),
            view: Mutex::new(LocalView::default()),
            tasks,
            plugins,
            transport,
            store,
            metrics,
            notices,
            exchanges,
            running: Arc::new(RwLock::new(false)),
            loops: StdMutex::new(Vec::new()),
        })
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TribeNotice> {
        self.notices.subscribe()
    }

    // ------------------------------------------------------------------
    // agreement 与成员操作
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn add_agreement(&self, name: &str) -> PulseResult<Agreement> {
        validate_agreement_name(name)?;
        {
            let mut state = self.state.lock().await;
            if state.agreements.has_agreement(name) {
                return Err(PulseError::conflict(format!("agreement {name} 已存在")));
            }
            self.emit(
                &mut state,
                EventKind::AddAgreement {
                    name: name.to_string(),
                },
            );
        }
        info!(agreement = name, "已创建 agreement");
        self.after_change().await;
        Ok(Agreement::new(name))
    }

    /// 删除 agreement；仍有成员时需要 `force`，强制删除会先逐个移出成员
    #[instrument(skip(self))]
    pub async fn delete_agreement(&self, name: &str, force: bool) -> PulseResult<()> {
        {
            let mut state = self.state.lock().await;
            let agreement = state.agreement(name)?;
            if !agreement.members.is_empty() && !force {
                return Err(PulseError::conflict(format!(
                    "agreement {name} 仍有 {} 个成员",
                    agreement.members.len()
                )));
            }
            for member in &agreement.members {
                self.emit(
                    &mut state,
                    EventKind::Leave {
                        member: member.clone(),
                        agreement: name.to_string(),
                    },
                );
            }
            self.emit(
                &mut state,
                EventKind::RemoveAgreement {
                    name: name.to_string(),
                },
            );
        }
        info!(agreement = name, force, "已删除 agreement");
        self.after_change().await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn join(&self, member: &str, agreement: &str) -> PulseResult<()> {
        {
            let mut state = self.state.lock().await;
            if !state.members.contains(member) {
                return Err(PulseError::MemberNotFound {
                    name: member.to_string(),
                });
            }
            state.agreement(agreement)?;
            match state.agreements.membership(member) {
                Some(current) if current == agreement => return Ok(()),
                Some(current) => {
                    return Err(PulseError::conflict(format!(
                        "成员 {member} 已属于 agreement {current}"
                    )))
                }
                None => {}
            }
            self.emit(
                &mut state,
                EventKind::Join {
                    member: member.to_string(),
                    agreement: agreement.to_string(),
                },
            );
        }
        info!(member, agreement, "成员已加入 agreement");
        self.after_change().await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn leave(&self, agreement: &str, member: &str) -> PulseResult<()> {
        {
            let mut state = self.state.lock().await;
            state.agreement(agreement)?;
            if state.agreements.membership(member).as_deref() != Some(agreement) {
                return Err(PulseError::MemberNotFound {
                    name: member.to_string(),
                });
            }
            self.emit(
                &mut state,
                EventKind::Leave {
                    member: member.to_string(),
                    agreement: agreement.to_string(),
                },
            );
        }
        info!(member, agreement, "成员已离开 agreement");
        self.after_change().await;
        Ok(())
    }

    /// 把本地任务的定义加入 agreement
    #[instrument(skip(self, task_id), fields(task_id = %task_id))]
    pub async fn add_task(&self, agreement: &str, task_id: &TaskId) -> PulseResult<()> {
        self.state.lock().await.agreement(agreement)?;
        let definition: TaskDefinition = self.tasks.describe(task_id).await?;

        {
            let mut state = self.state.lock().await;
            let current = state.agreement(agreement)?;
            if current.tasks.contains_key(task_id) {
                return Err(PulseError::conflict(format!(
                    "任务 {task_id} 已在 agreement {agreement} 中"
                )));
            }
            self.emit(
                &mut state,
                EventKind::AddTask {
                    agreement: agreement.to_string(),
                    task: definition,
                },
            );
        }
        info!(agreement, "任务已加入 agreement");
        self.after_change().await;
        Ok(())
    }

    #[instrument(skip(self, task_id), fields(task_id = %task_id))]
    pub async fn remove_task(&self, agreement: &str, task_id: &TaskId) -> PulseResult<()> {
        {
            let mut state = self.state.lock().await;
            let current = state.agreement(agreement)?;
            if !current.tasks.contains_key(task_id) {
                return Err(PulseError::task_not_found(task_id));
            }
            self.emit(
                &mut state,
                EventKind::RemoveTask {
                    agreement: agreement.to_string(),
                    task_id: task_id.clone(),
                },
            );
        }
        info!(agreement, "任务已从 agreement 移除");
        self.after_change().await;
        Ok(())
    }

    /// 把插件加入 agreement，发起节点自身必须能加载该插件
    #[instrument(skip(self, plugin), fields(plugin = %plugin))]
    pub async fn add_plugin(&self, agreement: &str, plugin: &PluginKey) -> PulseResult<()> {
        self.state.lock().await.agreement(agreement)?;
        if !self.plugins.is_loadable(plugin).await {
            return Err(PulseError::PluginNotFound {
                key: plugin.to_string(),
            });
        }

        {
            let mut state = self.state.lock().await;
            let current = state.agreement(agreement)?;
            if current.plugins.contains(plugin) {
                return Err(PulseError::conflict(format!(
                    "插件 {plugin} 已在 agreement {agreement} 中"
                )));
            }
            self.emit(
                &mut state,
                EventKind::AddPlugin {
                    agreement: agreement.to_string(),
                    plugin: plugin.clone(),
                },
            );
        }
        info!(agreement, "插件已加入 agreement");
        self.after_change().await;
        Ok(())
    }

    #[instrument(skip(self, plugin), fields(plugin = %plugin))]
    pub async fn remove_plugin(&self, agreement: &str, plugin: &PluginKey) -> PulseResult<()> {
        {
            let mut state = self.state.lock().await;
            let current = state.agreement(agreement)?;
            if !current.plugins.contains(plugin) {
                return Err(PulseError::PluginNotFound {
                    key: plugin.to_string(),
                });
            }
            self.emit(
                &mut state,
                EventKind::RemovePlugin {
                    agreement: agreement.to_string(),
                    plugin: plugin.clone(),
                },
            );
        }
        info!(agreement, "插件已从 agreement 移除");
        self.after_change().await;
        Ok(())
    }

    pub async fn get_agreements(&self) -> Vec<Agreement> {
        let state = self.state.lock().await;
        state
            .agreements
            .agreements(&state.excluded())
            .into_values()
            .collect()
    }

    pub async fn get_agreement(&self, name: &str) -> PulseResult<Agreement> {
        self.state.lock().await.agreement(name)
    }

    pub async fn get_members(&self) -> Vec<Member> {
        let state = self.state.lock().await;
        state
            .members
            .list()
            .into_iter()
            .map(|mut member| {
                member.agreement = state.agreements.membership(&member.name);
                member
            })
            .collect()
    }

    pub async fn get_member(&self, name: &str) -> PulseResult<Member> {
        let state = self.state.lock().await;
        let mut member = state
            .members
            .get(name)
            .cloned()
            .ok_or_else(|| PulseError::MemberNotFound {
                name: name.to_string(),
            })?;
        member.agreement = state.agreements.membership(name);
        Ok(member)
    }

    // ------------------------------------------------------------------
    // gossip 协议面
    // ------------------------------------------------------------------

    pub async fn digest(&self) -> GossipDigest {
        let state = self.state.lock().await;
        GossipDigest {
            from: self.local.clone(),
            address: self.address.clone(),
            vector: state.log.applied().clone(),
            members: state.members.summaries(),
        }
    }

    /// 应用一批事件，返回实际应用的条数
    pub async fn deliver_events(&self, events: Vec<GossipEvent>) -> usize {
        self.deliver_delta(GossipDelta::events(events)).await
    }

    /// 先合并快照（若有），再按序应用事件，返回实际应用的事件条数
    pub async fn deliver_delta(&self, delta: GossipDelta) -> usize {
        let (applied, merged, ties) = {
            let mut state = self.state.lock().await;
            let mut applied = 0;
            let mut merged = false;
            let mut ties = Vec::new();

            if let Some(snapshot) = delta.snapshot {
                if !state.log.applied().dominates(&snapshot.vector) {
                    debug!(registers = snapshot.registers.len(), "合并状态快照");
                    ties.extend(state.agreements.merge(&snapshot.registers));
                    for ready in state.log.absorb(&snapshot.vector) {
                        ties.extend(state.agreements.apply(&ready));
                        applied += 1;
                    }
                    merged = true;
                }
            }

            for event in delta.events {
                for ready in state.log.offer(event) {
                    debug!(
                        origin = %ready.origin,
                        version = ready.version,
                        kind = ready.kind.name(),
                        "应用 gossip 事件"
                    );
                    ties.extend(state.agreements.apply(&ready));
                    applied += 1;
                }
            }
            (applied, merged, ties)
        };

        for tie in ties {
            self.diverge("tie_break", tie.to_string());
        }
        if applied > 0 {
            self.metrics.record_events_applied(applied);
        }
        if applied > 0 || merged {
            self.after_change().await;
        }
        applied
    }

    async fn merge_digest(&self, digest: &GossipDigest) {
        let changes = {
            let mut state = self.state.lock().await;
            let now = Utc::now();
            state
                .peer_vectors
                .insert(digest.from.clone(), digest.vector.clone());
            let mut changes: Vec<StatusChange> = state
                .members
                .touch(&digest.from, &digest.address, now)
                .into_iter()
                .collect();
            for summary in &digest.members {
                changes.extend(state.members.observe(summary, now));
            }
            changes
        };
        self.announce(changes).await;
    }

    // ------------------------------------------------------------------
    // 后台循环
    // ------------------------------------------------------------------

    /// 启动 gossip 循环与心跳检测循环
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                return;
            }
            *running = true;
        }
        info!(member = %self.local, address = %self.address, "启动 tribe");

        let gossip = {
            let node = self.clone();
            tokio::spawn(async move { node.gossip_loop().await })
        };
        let heartbeat = {
            let node = self.clone();
            tokio::spawn(async move { node.heartbeat_loop().await })
        };
        self.loops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([gossip, heartbeat]);
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        let loops: Vec<JoinHandle<()>> = self
            .loops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in loops {
            handle.abort();
        }
        info!(member = %self.local, "tribe 已停止");
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.gossip_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !*self.running.read().await {
                break;
            }
            self.gossip_round().await;
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        loop {
            ticker.tick().await;
            if !*self.running.read().await {
                break;
            }
            self.heartbeat(Utc::now()).await;
        }
    }

    /// 一轮 gossip：随机选择至多 `fanout` 个对端并发交换
    pub async fn gossip_round(self: &Arc<Self>) {
        let targets = self.pick_targets().await;
        if targets.is_empty() {
            return;
        }

        let mut handles = Vec::with_capacity(targets.len());
        for address in targets {
            let Ok(permit) = self.exchanges.clone().acquire_owned().await else {
                return;
            };
            let node = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                node.exchange(&address).await
            }));
        }
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "gossip 交换任务异常退出");
            }
        }
    }

    async fn pick_targets(&self) -> Vec<String> {
        let mut candidates = {
            let state = self.state.lock().await;
            let mut candidates = state.members.peer_addresses();
            for seed in &self.config.seeds {
                if seed != &self.address && !state.members.is_known_address(seed) {
                    candidates.push(seed.clone());
                }
            }
            candidates
        };
        candidates.sort();
        candidates.dedup();
        candidates.shuffle(&mut rand::rng());
        candidates.truncate(self.config.fanout);
        candidates
    }

    /// 与一个对端完成一次推拉交换
    pub async fn exchange(&self, address: &str) -> PulseResult<()> {
        let started = Instant::now();
        let result = self.exchange_inner(address).await;
        let outcome = if result.is_ok() { "ok" } else { "failed" };
        self.metrics
            .record_gossip_exchange(outcome, started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(peer = address, error = %e, "gossip 交换失败");
        }
        result
    }

    async fn exchange_inner(&self, address: &str) -> PulseResult<()> {
        let retry = &self.config.retry;
        let digest = self.digest().await;

        let peer = with_retry(retry, "syn", || {
            self.timed(self.transport.syn(address, digest.clone()))
        })
        .await?;
        self.merge_digest(&peer).await;

        let mine = digest.vector;
        if !mine.dominates(&peer.vector) {
            let delta = with_retry(retry, "pull", || {
                self.timed(self.transport.pull(address, &mine))
            })
            .await?;
            self.deliver_delta(delta).await;
        }

        if !peer.vector.dominates(&mine) {
            let delta = self.state.lock().await.delta_since(&peer.vector);
            if !delta.is_empty() {
                debug!(
                    peer = %peer.from,
                    count = delta.events.len(),
                    snapshot = delta.snapshot.is_some(),
                    "推送增量"
                );
                with_retry(retry, "push", || {
                    self.timed(self.transport.push(address, delta.clone()))
                })
                .await?;
            }
        }

        self.track_divergence(&peer).await;
        Ok(())
    }

    async fn timed<T>(&self, fut: impl Future<Output = PulseResult<T>>) -> PulseResult<T> {
        match tokio::time::timeout(self.config.request_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(PulseError::Network(format!(
                "请求超时 ({}ms)",
                self.config.request_timeout_ms
            ))),
        }
    }

    /// 交换后仍无法覆盖对端摘要（例如事件缺口无法补齐）即视为不一致
    async fn track_divergence(&self, peer: &GossipDigest) {
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(self.config.divergence_threshold())
            .unwrap_or(chrono::Duration::MAX);
        let warning = {
            let mut state = self.state.lock().await;
            if state.log.applied().dominates(&peer.vector) {
                state.disagreeing_since.remove(&peer.from);
                state.warned.remove(&peer.from);
                None
            } else {
                let since = *state
                    .disagreeing_since
                    .entry(peer.from.clone())
                    .or_insert(now);
                (now - since >= threshold && state.warned.insert(peer.from.clone())).then(|| {
                    format!(
                        "与成员 {} 的摘要不一致已持续 {} 秒",
                        peer.from,
                        (now - since).num_seconds()
                    )
                })
            }
        };
        if let Some(reason) = warning {
            self.diverge("digest", reason);
        }
    }

    /// 一个心跳周期：自增本节点计数，执行失效检测并压缩事件日志
    pub async fn heartbeat(&self, now: DateTime<Utc>) -> Vec<StatusChange> {
        let changes = {
            let mut state = self.state.lock().await;
            state.members.beat(now);
            let changes = state.members.tick(now);
            let floor = state.compaction_floor(&self.local);
            let compacted = state.log.compact(&floor);
            if compacted > 0 {
                debug!(compacted, retained = state.log.history_len(), "已压缩 gossip 事件");
            }
            changes
        };
        let removed = changes.iter().any(|c| c.to == MemberStatus::Dead);
        self.announce(changes.clone()).await;
        if removed {
            self.persist().await;
        }
        changes
    }

    async fn announce(&self, changes: Vec<StatusChange>) {
        if changes.is_empty() {
            return;
        }
        for change in changes {
            if change.to == MemberStatus::Dead {
                warn!(member = %change.member, "成员已失效，从所属 agreement 中移除");
            }
            let _ = self.notices.send(TribeNotice::MemberStatusChanged {
                member: change.member,
                from: change.from,
                to: change.to,
            });
        }

        let state = self.state.lock().await;
        for status in [
            MemberStatus::Unknown,
            MemberStatus::Alive,
            MemberStatus::Suspect,
            MemberStatus::Dead,
        ] {
            self.metrics
                .update_member_count(status.as_str(), state.members.count(status));
        }
    }

    // ------------------------------------------------------------------
    // 本地落地
    // ------------------------------------------------------------------

    /// 从存储恢复复制状态快照，返回恢复的 agreement 数量
    ///
    /// 本节点的事件计数从快照继续，之后的本地事件不会与重启前的冲突。
    pub async fn restore(&self) -> PulseResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let Some(snapshot) = store.load_tribe_snapshot().await? else {
            return Ok(0);
        };
        let count = {
            let mut state = self.state.lock().await;
            state.agreements.merge(&snapshot.registers);
            state.log.restore(&snapshot.vector);
            state.agreements.agreements(&HashSet::new()).len()
        };
        info!(count, vector = ?snapshot.vector, "已恢复复制状态快照");
        self.reconcile_local().await;
        Ok(count)
    }

    fn emit(&self, state: &mut TribeState, kind: EventKind) {
        let event = state.log.emit(&self.local, kind, Utc::now());
        debug!(version = event.version, kind = event.kind.name(), "生成本地事件");
        state.agreements.apply(&event);
    }

    async fn after_change(&self) {
        self.persist().await;
        self.reconcile_local().await;
    }

    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = self.state.lock().await.snapshot();
        if let Err(e) = store.save_tribe_snapshot(&snapshot).await {
            error!(error = %e, "保存复制状态失败");
        }
    }

    fn diverge(&self, reason: &'static str, message: String) {
        warn!(reason, message = %message, "集群视图分歧");
        self.metrics.record_divergence(reason);
        let _ = self.notices.send(TribeNotice::Divergence { reason: message });
    }

    /// 让本地任务与插件跟随本节点所属 agreement
    ///
    /// 先释放不再需要的任务、卸载由 tribe 加载且不再需要的插件，
    /// 再加载新插件、接管新任务。
    async fn reconcile_local(&self) {
        let mut view = self.view.lock().await;
        let desired = {
            let state = self.state.lock().await;
            state
                .agreements
                .membership(&self.local)
                .and_then(|name| state.agreements.agreement(&name, &HashSet::new()))
        };
        let (name, tasks, plugins) = match desired {
            Some(agreement) => (agreement.name, agreement.tasks, agreement.plugins),
            None => (String::new(), Default::default(), Default::default()),
        };

        let released: Vec<(TaskId, String)> = view
            .adopted
            .iter()
            .filter(|(id, adopted)| adopted.agreement != name || !tasks.contains_key(*id))
            .map(|(id, adopted)| (id.clone(), adopted.agreement.clone()))
            .collect();
        for (id, agreement) in released {
            if let Err(e) = self.tasks.release(&id, &agreement).await {
                error!(task_id = %id, agreement = %agreement, error = %e, "释放任务失败");
            }
            view.adopted.remove(&id);
        }
        view.rejected_tasks.retain(|id| tasks.contains_key(id));

        let unneeded: Vec<(PluginKey, bool)> = view
            .plugins
            .iter()
            .filter(|(key, _)| !plugins.contains(*key))
            .map(|(key, loaded)| (key.clone(), *loaded))
            .collect();
        for (key, loaded_by_tribe) in unneeded {
            if loaded_by_tribe {
                match self.plugins.unload(&key).await {
                    Ok(_) => info!(plugin = %key, "已卸载 agreement 插件"),
                    Err(e) => warn!(plugin = %key, error = %e, "卸载插件失败"),
                }
            }
            view.plugins.remove(&key);
        }
        view.rejected_plugins.retain(|key| plugins.contains(key));

        for key in &plugins {
            if view.plugins.contains_key(key) {
                continue;
            }
            match self.ensure_plugin(key).await {
                Ok(loaded_by_tribe) => {
                    view.plugins.insert(key.clone(), loaded_by_tribe);
                }
                Err(e) => {
                    if view.rejected_plugins.insert(key.clone()) {
                        self.diverge(
                            "plugin_unloadable",
                            format!("agreement {name} 的插件 {key} 无法在本节点加载: {e}"),
                        );
                    }
                }
            }
        }

        // 定义变化（例如并发写入的裁决结果晚到）时重新接管以替换本地定义
        for (id, definition) in tasks {
            if view
                .adopted
                .get(&id)
                .is_some_and(|adopted| adopted.definition == definition)
            {
                continue;
            }
            match self.tasks.adopt(definition.clone(), &name).await {
                Ok(()) => {
                    view.rejected_tasks.remove(&id);
                    view.adopted.insert(
                        id,
                        AdoptedTask {
                            agreement: name.clone(),
                            definition,
                        },
                    );
                }
                Err(e) => {
                    if view.rejected_tasks.insert(id.clone()) {
                        self.diverge(
                            "task_rejected",
                            format!("agreement {name} 的任务 {id} 无法在本节点运行: {e}"),
                        );
                    }
                }
            }
        }
    }

    /// 返回插件是否由本次调用加载
    async fn ensure_plugin(&self, key: &PluginKey) -> PulseResult<bool> {
        if self.plugins.get(key).await.is_ok() {
            return Ok(false);
        }
        if !self.plugins.is_loadable(key).await {
            return Err(PulseError::PluginNotFound {
                key: key.to_string(),
            });
        }
        self.plugins.load(key).await?;
        info!(plugin = %key, "已为 agreement 加载插件");
        Ok(true)
    }

    /// 已应用事件的版本向量
    pub async fn applied(&self) -> VersionVector {
        self.state.lock().await.log.applied().clone()
    }
}

#[async_trait]
impl GossipHandler for TribeManager {
    async fn handle_syn(&self, digest: GossipDigest) -> PulseResult<GossipDigest> {
        self.merge_digest(&digest).await;
        Ok(self.digest().await)
    }

    async fn events_since(&self, vector: &VersionVector) -> PulseResult<GossipDelta> {
        Ok(self.state.lock().await.delta_since(vector))
    }

    async fn deliver(&self, delta: GossipDelta) -> PulseResult<()> {
        self.deliver_delta(delta).await;
        Ok(())
    }
}
