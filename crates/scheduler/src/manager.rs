//! 任务管理器
//!
//! 以任务 id 为键的注册表。每个任务一把异步互斥锁，同一任务的状态
//! 变更严格串行，不同任务之间互不阻塞。锁顺序固定为“任务锁 → 注册表锁”，
//! 持有注册表锁时从不等待任务锁。
//!
//! 每个装载中的任务有一个独立的计时循环；到期后在任务锁内完成
//! Spinning → Running 的判定，随后把工作流执行放到单独的 tokio 任务中，
//! 因此 `stop` 取消计时循环不会打断正在进行的执行。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pulse_core::config::SchedulerConfig;
use pulse_core::models::{
    Task, TaskDefinition, TaskEvent, TaskFilter, TaskId, TaskOrigin, TaskSpec, TaskState,
    Workflow,
};
use pulse_core::{
    LocalTaskPort, MetricCatalog, PluginCatalog, PulseError, PulseResult, TaskStore,
};
use pulse_infrastructure::MetricsCollector;

use crate::executor::{RunReport, WorkflowExecutor};
use crate::lifecycle::{self, FireDecision, Transition};
use crate::timer::{validate_schedule, FirePlan, Tick};
use crate::watch::{TaskWatcher, WatchHub};

/// 一次触发的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Completed(RunReport),
    Failed(String),
    /// 上一次执行尚未结束，本次计为 miss
    Skipped,
    /// 任务不在装载状态，未执行
    NotArmed,
}

struct TaskSlot {
    task: Mutex<Task>,
    timer: StdMutex<Option<JoinHandle<()>>>,
    in_flight: AtomicBool,
    exhausted: AtomicBool,
    removed: AtomicBool,
    trigger: Arc<Notify>,
    hub: WatchHub,
}

impl TaskSlot {
    fn new(task: Task, watch_buffer: usize) -> Self {
        Self {
            task: Mutex::new(task),
            timer: StdMutex::new(None),
            in_flight: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            trigger: Arc::new(Notify::new()),
            hub: WatchHub::new(watch_buffer),
        }
    }

    fn replace_timer(&self, handle: Option<JoinHandle<()>>) {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = std::mem::replace(&mut *timer, handle) {
            previous.abort();
        }
    }

    fn cancel_timer(&self) {
        self.replace_timer(None);
    }
}

/// 到期判定的结果，交给执行阶段处理
enum Begun {
    Fire {
        task_id: TaskId,
        workflow: Workflow,
        deadline: Duration,
    },
    Skipped,
    Ignored,
}

struct Inner {
    config: SchedulerConfig,
    tasks: RwLock<HashMap<TaskId, Arc<TaskSlot>>>,
    executor: WorkflowExecutor,
    plugins: Arc<dyn PluginCatalog>,
    metric_catalog: Arc<dyn MetricCatalog>,
    store: Option<Arc<dyn TaskStore>>,
    metrics: Arc<MetricsCollector>,
}

/// 任务管理器，克隆开销很小，所有克隆共享同一注册表
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn new(
        config: SchedulerConfig,
        plugins: Arc<dyn PluginCatalog>,
        metric_catalog: Arc<dyn MetricCatalog>,
        store: Option<Arc<dyn TaskStore>>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let executor = WorkflowExecutor::new(plugins.clone(), metric_catalog.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                tasks: RwLock::new(HashMap::new()),
                executor,
                plugins,
                metric_catalog,
                store,
                metrics,
            }),
        }
    }

    /// 创建任务，初始状态为 Stopped；`spec.start` 为真时立即启动
    pub async fn create(&self, spec: TaskSpec) -> PulseResult<TaskId> {
        let id = TaskId::generate();
        let name = match spec.name {
            Some(name) if name.trim().is_empty() => {
                return Err(PulseError::validation("任务名称不能为空"))
            }
            Some(name) => name,
            None => format!("Task-{}", id.as_str().chars().take(8).collect::<String>()),
        };
        let definition = TaskDefinition {
            id: id.clone(),
            name,
            workflow: spec.workflow,
            schedule: spec.schedule,
            deadline: spec
                .deadline
                .unwrap_or_else(|| self.inner.config.default_deadline()),
        };

        self.create_with_definition(definition, TaskOrigin::Local)
            .await?;
        if spec.start {
            self.start(&id).await?;
        }
        Ok(id)
    }

    /// 以给定定义（保留其 id）创建任务，用于复制路径和恢复
    pub async fn create_with_definition(
        &self,
        definition: TaskDefinition,
        origin: TaskOrigin,
    ) -> PulseResult<TaskId> {
        self.validate_definition(&definition).await?;

        let id = definition.id.clone();
        let slot = Arc::new(TaskSlot::new(
            Task::from_definition(definition, origin),
            self.inner.config.watch_buffer,
        ));

        let task = slot.task.lock().await;
        let count = {
            let mut tasks = self.inner.tasks.write().await;
            if tasks.contains_key(&id) {
                return Err(PulseError::conflict(format!("任务已存在: {id}")));
            }
            tasks.insert(id.clone(), slot.clone());
            tasks.len()
        };

        self.inner.persist(&slot, &task).await;
        self.inner.metrics.update_task_count(count);
        info!(task_id = %id, name = %task.name, schedule = %task.schedule, "任务已创建");
        Ok(id)
    }

    /// 创建前的完整校验：工作流结构、调度策略、插件可解析、采集指标可解析
    async fn validate_definition(&self, definition: &TaskDefinition) -> PulseResult<()> {
        if definition.deadline.is_zero() {
            return Err(PulseError::validation("截止时间必须大于0"));
        }
        definition.workflow.validate()?;
        validate_schedule(&definition.schedule, Utc::now())?;

        for plugin in definition.workflow.plugins() {
            self.inner
                .plugins
                .resolve(plugin)
                .await
                .map_err(into_validation)?;
        }
        if let Some(collect) = definition.workflow.collect_stage() {
            self.inner
                .metric_catalog
                .resolve(&collect.metrics)
                .await
                .map_err(into_validation)?;
        }
        Ok(())
    }

    pub async fn get(&self, id: &TaskId) -> PulseResult<Task> {
        let slot = self.slot(id).await?;
        let task = slot.task.lock().await;
        Ok(task.clone())
    }

    /// 按创建时间排序的任务快照
    pub async fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let slots: Vec<Arc<TaskSlot>> = self.inner.tasks.read().await.values().cloned().collect();
        let mut tasks = Vec::with_capacity(slots.len());
        for slot in slots {
            let task = slot.task.lock().await;
            if filter.matches(&task) {
                tasks.push(task.clone());
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// 删除任务；装载中的任务必须先停止
    pub async fn remove(&self, id: &TaskId) -> PulseResult<()> {
        let slot = self.slot(id).await?;
        let count = {
            let task = slot.task.lock().await;
            if task.state.is_armed() {
                return Err(PulseError::invalid_state(id, task.state, "remove"));
            }
            let mut tasks = self.inner.tasks.write().await;
            tasks.remove(id);
            slot.removed.store(true, Ordering::SeqCst);
            slot.cancel_timer();
            slot.hub.close();
            tasks.len()
        };

        if let Some(store) = &self.inner.store {
            if let Err(e) = store.delete_task(id).await {
                error!(task_id = %id, error = %e, "删除任务持久化记录失败");
            }
        }
        self.inner.metrics.update_task_count(count);
        info!(task_id = %id, "任务已删除");
        Ok(())
    }

    pub async fn start(&self, id: &TaskId) -> PulseResult<()> {
        let slot = self.slot(id).await?;
        let mut task = slot.task.lock().await;
        self.start_locked(&slot, &mut task).await
    }

    async fn start_locked(
        &self,
        slot: &Arc<TaskSlot>,
        task: &mut MutexGuard<'_, Task>,
    ) -> PulseResult<()> {
        let Some(transition) = lifecycle::start(task)? else {
            return Ok(());
        };
        let plan = match FirePlan::arm(&task.schedule, slot.trigger.clone(), Utc::now()) {
            Ok(plan) => plan,
            Err(e) => {
                task.state = transition.from;
                return Err(e);
            }
        };
        self.inner.arm(slot, plan);
        self.inner.after_transition(slot, task, transition).await;
        Ok(())
    }

    /// 停止任务：取消后续触发，正在进行的执行照常完成
    pub async fn stop(&self, id: &TaskId) -> PulseResult<()> {
        let slot = self.slot(id).await?;
        let mut task = slot.task.lock().await;
        self.stop_locked(&slot, &mut task).await
    }

    async fn stop_locked(
        &self,
        slot: &Arc<TaskSlot>,
        task: &mut MutexGuard<'_, Task>,
    ) -> PulseResult<()> {
        if let Some(transition) = lifecycle::stop(task)? {
            slot.cancel_timer();
            self.inner.after_transition(slot, task, transition).await;
        }
        Ok(())
    }

    pub async fn enable(&self, id: &TaskId) -> PulseResult<()> {
        let slot = self.slot(id).await?;
        let mut task = slot.task.lock().await;
        if let Some(transition) = lifecycle::enable(&mut task)? {
            self.inner.after_transition(&slot, &task, transition).await;
        }
        Ok(())
    }

    pub async fn disable(&self, id: &TaskId, reason: &str) -> PulseResult<()> {
        let slot = self.slot(id).await?;
        let mut task = slot.task.lock().await;
        match lifecycle::disable(&mut task, reason)? {
            Some(transition) => {
                slot.cancel_timer();
                self.inner.after_transition(&slot, &task, transition).await;
            }
            None => self.inner.persist(&slot, &task).await,
        }
        Ok(())
    }

    /// 触发一次 Streaming 调度的任务
    pub async fn trigger(&self, id: &TaskId) -> PulseResult<()> {
        let slot = self.slot(id).await?;
        let task = slot.task.lock().await;
        if !task.schedule.is_streaming() {
            return Err(PulseError::validation(format!(
                "只有 streaming 调度的任务可以手动触发，任务 {id} 的调度为 {}",
                task.schedule
            )));
        }
        if !task.state.is_armed() {
            return Err(PulseError::invalid_state(id, task.state, "trigger"));
        }
        slot.trigger.notify_one();
        debug!(task_id = %id, "已触发 streaming 任务");
        Ok(())
    }

    /// 订阅任务事件，任务删除后流结束
    pub async fn watch(&self, id: &TaskId) -> PulseResult<TaskWatcher> {
        let slot = self.slot(id).await?;
        Ok(slot.hub.subscribe())
    }

    /// 立即执行一次到期处理并等待执行结束
    ///
    /// 计时循环走同一条路径，只是不等待执行结束。
    pub async fn fire(&self, id: &TaskId) -> PulseResult<FireOutcome> {
        let slot = self.slot(id).await?;
        let begun = self.inner.begin_fire(&slot).await;
        Ok(self.inner.clone().finish_fire(slot, begun).await)
    }

    /// 从存储恢复任务；Running 归一化为 Spinning，装载中的任务重新计时
    pub async fn restore(&self) -> PulseResult<usize> {
        let Some(store) = self.inner.store.clone() else {
            return Ok(0);
        };

        let mut restored = 0;
        for mut task in store.load_tasks().await? {
            if task.state == TaskState::Running {
                task.state = TaskState::Spinning;
            }
            let id = task.id.clone();
            let slot = Arc::new(TaskSlot::new(task, self.inner.config.watch_buffer));
            {
                let mut tasks = self.inner.tasks.write().await;
                if tasks.contains_key(&id) {
                    warn!(task_id = %id, "恢复时任务已存在，跳过");
                    continue;
                }
                tasks.insert(id.clone(), slot.clone());
            }

            let mut task = slot.task.lock().await;
            if task.state == TaskState::Spinning {
                match FirePlan::arm(&task.schedule, slot.trigger.clone(), Utc::now()) {
                    Ok(plan) => self.inner.arm(&slot, plan),
                    Err(e) => {
                        warn!(task_id = %id, error = %e, "恢复的任务无法重新计时，置为 Stopped");
                        task.state = TaskState::Stopped;
                        self.inner.persist(&slot, &task).await;
                    }
                }
            }
            restored += 1;
        }

        let count = self.inner.tasks.read().await.len();
        self.inner.metrics.update_task_count(count);
        info!(restored, "已从存储恢复任务");
        Ok(restored)
    }

    /// 取消全部计时器并关闭订阅；任务状态保持不变以便重启后恢复
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<TaskSlot>> = self.inner.tasks.read().await.values().cloned().collect();
        for slot in &slots {
            slot.cancel_timer();
            slot.hub.close();
        }
        info!(tasks = slots.len(), "任务管理器已关闭");
    }

    pub async fn len(&self) -> usize {
        self.inner.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn slot(&self, id: &TaskId) -> PulseResult<Arc<TaskSlot>> {
        self.inner
            .tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PulseError::task_not_found(id))
    }
}

impl Inner {
    fn arm(self: &Arc<Self>, slot: &Arc<TaskSlot>, plan: FirePlan) {
        slot.exhausted.store(false, Ordering::SeqCst);
        let handle = tokio::spawn(run_timer(Arc::downgrade(self), slot.clone(), plan));
        slot.replace_timer(Some(handle));
    }

    /// 到期判定，持有任务锁期间没有其他等待点
    async fn begin_fire(&self, slot: &Arc<TaskSlot>) -> Begun {
        let mut task = slot.task.lock().await;
        let in_flight = slot.in_flight.load(Ordering::SeqCst);
        match lifecycle::begin_fire(&mut task, in_flight) {
            FireDecision::Fire => {
                slot.in_flight.store(true, Ordering::SeqCst);
                slot.hub.publish(TaskEvent::FireStarted {
                    task_id: task.id.clone(),
                    at: task.last_fire_at.unwrap_or_else(Utc::now),
                });
                Begun::Fire {
                    task_id: task.id.clone(),
                    workflow: task.workflow.clone(),
                    deadline: task.deadline,
                }
            }
            FireDecision::Skip => {
                slot.hub.publish(TaskEvent::FireSkipped {
                    task_id: task.id.clone(),
                    at: Utc::now(),
                });
                Begun::Skipped
            }
            FireDecision::Ignore => Begun::Ignored,
        }
    }

    async fn finish_fire(self: Arc<Self>, slot: Arc<TaskSlot>, begun: Begun) -> FireOutcome {
        let (task_id, workflow, deadline) = match begun {
            Begun::Fire {
                task_id,
                workflow,
                deadline,
            } => (task_id, workflow, deadline),
            Begun::Skipped => {
                let task = slot.task.lock().await;
                warn!(task_id = %task.id, miss_count = task.miss_count, "上一次执行尚未结束，跳过本次触发");
                self.metrics.record_fire_skipped();
                self.persist(&slot, &task).await;
                return FireOutcome::Skipped;
            }
            Begun::Ignored => return FireOutcome::NotArmed,
        };

        debug!(task_id = %task_id, "开始执行工作流");
        let started = tokio::time::Instant::now();
        let result = self.executor.execute(&workflow, deadline).await;
        let elapsed = started.elapsed();

        let mut task = slot.task.lock().await;
        slot.in_flight.store(false, Ordering::SeqCst);
        let exhausted = slot.exhausted.load(Ordering::SeqCst);
        let threshold = self.config.failure_threshold;

        let (outcome, transition) = match result {
            Ok(report) => {
                let transition = lifecycle::complete_fire(&mut task, Ok(()), threshold, exhausted);
                slot.hub.publish(TaskEvent::FireCompleted {
                    task_id: task_id.clone(),
                    at: Utc::now(),
                    duration_ms: elapsed.as_millis() as u64,
                    metrics: report.collected,
                });
                self.metrics.record_fire("completed", elapsed.as_secs_f64());
                (FireOutcome::Completed(report), transition)
            }
            Err(e) => {
                let message = e.to_string();
                let transition =
                    lifecycle::complete_fire(&mut task, Err(&message), threshold, exhausted);
                slot.hub.publish(TaskEvent::FireFailed {
                    task_id: task_id.clone(),
                    at: Utc::now(),
                    error: message.clone(),
                    consecutive_failures: task.consecutive_failures,
                });
                self.metrics.record_fire("failed", elapsed.as_secs_f64());
                warn!(
                    task_id = %task_id,
                    consecutive_failures = task.consecutive_failures,
                    error = %message,
                    "工作流执行失败"
                );
                (FireOutcome::Failed(message), transition)
            }
        };

        match transition {
            Some(transition) => {
                if matches!(transition.to, TaskState::Disabled | TaskState::Ended) {
                    slot.cancel_timer();
                }
                self.after_transition(&slot, &task, transition).await;
            }
            None => self.persist(&slot, &task).await,
        }
        outcome
    }

    async fn exhaust(&self, slot: &Arc<TaskSlot>) {
        let mut task = slot.task.lock().await;
        if slot.in_flight.load(Ordering::SeqCst) {
            return;
        }
        if let Some(transition) = lifecycle::exhaust(&mut task) {
            self.after_transition(slot, &task, transition).await;
        }
    }

    async fn after_transition(&self, slot: &TaskSlot, task: &Task, transition: Transition) {
        slot.hub.publish(TaskEvent::StateChanged {
            task_id: task.id.clone(),
            from: transition.from,
            to: transition.to,
        });
        self.metrics
            .record_state_change(transition.from.as_str(), transition.to.as_str());
        info!(
            task_id = %task.id,
            from = %transition.from,
            to = %transition.to,
            "任务状态变更"
        );
        self.persist(slot, task).await;
    }

    /// 持久化失败只记录日志，本地状态以内存为准
    ///
    /// 调用方必须持有任务锁；已删除的任务不再写入，否则会在删除之后复活。
    async fn persist(&self, slot: &TaskSlot, task: &Task) {
        if slot.removed.load(Ordering::SeqCst) {
            debug!(task_id = %task.id, "任务已删除，跳过持久化");
            return;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.save_task(task).await {
                error!(task_id = %task.id, error = %e, "任务持久化失败");
            }
        }
    }
}

async fn run_timer(inner: Weak<Inner>, slot: Arc<TaskSlot>, mut plan: FirePlan) {
    loop {
        let tick = plan.next().await;
        if tick == Tick::Exhausted || plan.is_exhausted() {
            slot.exhausted.store(true, Ordering::SeqCst);
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };

        match tick {
            Tick::Due => {
                let begun = inner.begin_fire(&slot).await;
                tokio::spawn(inner.clone().finish_fire(slot.clone(), begun));
                if plan.is_exhausted() {
                    return;
                }
            }
            Tick::Exhausted => {
                inner.exhaust(&slot).await;
                return;
            }
        }
    }
}

fn into_validation(e: PulseError) -> PulseError {
    match e {
        PulseError::Validation(_) | PulseError::InvalidCron { .. } => e,
        other => PulseError::Validation(other.to_string()),
    }
}

#[async_trait]
impl LocalTaskPort for TaskManager {
    async fn describe(&self, id: &TaskId) -> PulseResult<TaskDefinition> {
        Ok(self.get(id).await?.definition())
    }

    async fn adopt(&self, definition: TaskDefinition, agreement: &str) -> PulseResult<()> {
        let origin = TaskOrigin::Agreement(agreement.to_string());
        let id = definition.id.clone();

        let slot = match self.slot(&id).await {
            Ok(slot) => slot,
            Err(PulseError::TaskNotFound { .. }) => {
                self.create_with_definition(definition, origin).await?;
                info!(task_id = %id, agreement, "已从 agreement 接管任务");
                return self.start(&id).await;
            }
            Err(e) => return Err(e),
        };

        // 定义以 agreement 中的为准，先校验再替换
        let current = slot.task.lock().await.definition();
        let replacement = if current != definition {
            self.validate_definition(&definition).await?;
            Some(definition)
        } else {
            None
        };

        let mut task = slot.task.lock().await;
        let mut changed = task.origins.insert(origin);
        if let Some(definition) = replacement {
            if task.state.is_armed() {
                let plan = FirePlan::arm(&definition.schedule, slot.trigger.clone(), Utc::now())?;
                self.inner.arm(&slot, plan);
            }
            task.redefine(definition);
            changed = true;
            info!(task_id = %id, name = %task.name, schedule = %task.schedule, agreement, "已按 agreement 更新任务定义");
        }
        if changed {
            self.inner.persist(&slot, &task).await;
        }
        match task.state {
            TaskState::Stopped => self.start_locked(&slot, &mut task).await,
            TaskState::Spinning | TaskState::Running => Ok(()),
            TaskState::Disabled | TaskState::Ended => {
                info!(task_id = %id, state = %task.state, agreement, "任务已存在且不可启动，仅记录来源");
                Ok(())
            }
        }
    }

    async fn release(&self, id: &TaskId, agreement: &str) -> PulseResult<()> {
        let origin = TaskOrigin::Agreement(agreement.to_string());
        let slot = match self.slot(id).await {
            Ok(slot) => slot,
            Err(PulseError::TaskNotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        let orphaned = {
            let mut task = slot.task.lock().await;
            if !task.origins.remove(&origin) {
                return Ok(());
            }
            if task.state.is_armed() {
                self.stop_locked(&slot, &mut task).await?;
            } else {
                self.inner.persist(&slot, &task).await;
            }
            task.origins.is_empty()
        };

        if orphaned {
            self.remove(id).await?;
        }
        info!(task_id = %id, agreement, removed = orphaned, "已解除 agreement 对任务的接管");
        Ok(())
    }
}
