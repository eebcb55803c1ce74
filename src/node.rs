use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use pulse_core::config::AppConfig;
use pulse_core::models::{
    Agreement, ConfigMap, Member, MetricDefinition, PluginFilter, PluginInfo, PluginKey, Task,
    TaskFilter, TaskId, TaskSpec,
};
use pulse_core::{MetricCatalog, PluginCatalog, PulseResult, TaskStore};
use pulse_infrastructure::MetricsCollector;
use pulse_scheduler::{TaskManager, TaskWatcher};
use pulse_tribe::{GossipTransport, TribeManager, TribeNotice};

/// 节点对外的操作入口
///
/// 汇总任务管理器、部落管理器和插件/指标目录，供 CLI、RPC 等上层调用。
#[derive(Clone)]
pub struct Node {
    tasks: TaskManager,
    tribe: Arc<TribeManager>,
    plugins: Arc<dyn PluginCatalog>,
    metric_catalog: Arc<dyn MetricCatalog>,
}

/// 组装节点所需的外部协作方
pub struct NodeParts {
    pub member: Member,
    pub plugins: Arc<dyn PluginCatalog>,
    pub metric_catalog: Arc<dyn MetricCatalog>,
    pub transport: Arc<dyn GossipTransport>,
    pub store: Option<Arc<dyn TaskStore>>,
    pub metrics: Arc<MetricsCollector>,
}

impl Node {
    pub fn new(config: &AppConfig, parts: NodeParts) -> Self {
        let tasks = TaskManager::new(
            config.scheduler.clone(),
            parts.plugins.clone(),
            parts.metric_catalog.clone(),
            parts.store.clone(),
            parts.metrics.clone(),
        );
        let tribe = TribeManager::new(
            config.tribe.clone(),
            parts.member,
            Arc::new(tasks.clone()),
            parts.plugins.clone(),
            parts.transport,
            parts.store,
            parts.metrics,
        );

        Self {
            tasks,
            tribe,
            plugins: parts.plugins,
            metric_catalog: parts.metric_catalog,
        }
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn tribe(&self) -> &Arc<TribeManager> {
        &self.tribe
    }

    /// 先恢复本地任务，再恢复 agreement，使部落对账基于已恢复的任务
    pub async fn restore(&self) -> PulseResult<(usize, usize)> {
        let tasks = self.tasks.restore().await?;
        let agreements = self.tribe.restore().await?;
        info!(tasks, agreements, "节点状态已恢复");
        Ok((tasks, agreements))
    }

    pub async fn shutdown(&self) {
        self.tribe.stop().await;
        self.tasks.shutdown().await;
    }

    // 任务

    pub async fn create_task(&self, spec: TaskSpec) -> PulseResult<TaskId> {
        self.tasks.create(spec).await
    }

    pub async fn get_task(&self, id: &TaskId) -> PulseResult<Task> {
        self.tasks.get(id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        self.tasks.list(filter).await
    }

    pub async fn delete_task(&self, id: &TaskId) -> PulseResult<()> {
        self.tasks.remove(id).await
    }

    pub async fn start_task(&self, id: &TaskId) -> PulseResult<()> {
        self.tasks.start(id).await
    }

    pub async fn stop_task(&self, id: &TaskId) -> PulseResult<()> {
        self.tasks.stop(id).await
    }

    pub async fn enable_task(&self, id: &TaskId) -> PulseResult<()> {
        self.tasks.enable(id).await
    }

    pub async fn disable_task(&self, id: &TaskId) -> PulseResult<()> {
        self.tasks.disable(id, "disabled by operator").await
    }

    pub async fn watch_task(&self, id: &TaskId) -> PulseResult<TaskWatcher> {
        self.tasks.watch(id).await
    }

    pub async fn trigger_task(&self, id: &TaskId) -> PulseResult<()> {
        self.tasks.trigger(id).await
    }

    // 部落

    pub async fn list_agreements(&self) -> Vec<Agreement> {
        self.tribe.get_agreements().await
    }

    pub async fn get_agreement(&self, name: &str) -> PulseResult<Agreement> {
        self.tribe.get_agreement(name).await
    }

    pub async fn create_agreement(&self, name: &str) -> PulseResult<Agreement> {
        self.tribe.add_agreement(name).await
    }

    pub async fn delete_agreement(&self, name: &str, force: bool) -> PulseResult<()> {
        self.tribe.delete_agreement(name, force).await
    }

    pub async fn join_agreement(&self, agreement: &str, member: &str) -> PulseResult<()> {
        self.tribe.join(member, agreement).await
    }

    pub async fn leave_agreement(&self, agreement: &str, member: &str) -> PulseResult<()> {
        self.tribe.leave(agreement, member).await
    }

    pub async fn add_agreement_task(&self, agreement: &str, id: &TaskId) -> PulseResult<()> {
        self.tribe.add_task(agreement, id).await
    }

    pub async fn remove_agreement_task(&self, agreement: &str, id: &TaskId) -> PulseResult<()> {
        self.tribe.remove_task(agreement, id).await
    }

    pub async fn add_agreement_plugin(&self, agreement: &str, key: &PluginKey) -> PulseResult<()> {
        self.tribe.add_plugin(agreement, key).await
    }

    pub async fn remove_agreement_plugin(
        &self,
        agreement: &str,
        key: &PluginKey,
    ) -> PulseResult<()> {
        self.tribe.remove_plugin(agreement, key).await
    }

    pub async fn list_members(&self) -> Vec<Member> {
        self.tribe.get_members().await
    }

    pub async fn get_member(&self, name: &str) -> PulseResult<Member> {
        self.tribe.get_member(name).await
    }

    pub fn subscribe_tribe(&self) -> broadcast::Receiver<TribeNotice> {
        self.tribe.subscribe()
    }

    // 插件

    pub async fn list_plugins(&self, filter: &PluginFilter) -> Vec<PluginInfo> {
        self.plugins.list(filter).await
    }

    pub async fn get_plugin(&self, key: &PluginKey) -> PulseResult<PluginInfo> {
        self.plugins.get(key).await
    }

    pub async fn load_plugin(&self, key: &PluginKey) -> PulseResult<PluginInfo> {
        self.plugins.load(key).await
    }

    pub async fn unload_plugin(&self, key: &PluginKey) -> PulseResult<PluginInfo> {
        self.plugins.unload(key).await
    }

    pub async fn plugin_config(&self, key: &PluginKey) -> PulseResult<ConfigMap> {
        self.plugins.config(key).await
    }

    pub async fn set_plugin_config(
        &self,
        key: &PluginKey,
        items: ConfigMap,
    ) -> PulseResult<ConfigMap> {
        self.plugins.set_config(key, items).await
    }

    pub async fn delete_plugin_config(
        &self,
        key: &PluginKey,
        names: &[String],
    ) -> PulseResult<ConfigMap> {
        self.plugins.delete_config(key, names).await
    }

    // 指标目录

    pub async fn list_metrics(&self) -> Vec<MetricDefinition> {
        self.metric_catalog.list().await
    }

    pub async fn query_metrics(&self, queries: &[String]) -> PulseResult<Vec<MetricDefinition>> {
        self.metric_catalog.resolve(queries).await
    }
}
