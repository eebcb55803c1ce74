//! 插件与指标目录接口定义
//!
//! 核心从不根据具体插件身份分支：工作流的每个阶段都通过
//! [`PluginCatalog`] 把 `type+name+version` 解析为一个 [`PluginInstance`]，
//! 再以统一的 `run(input) -> output` 调用。

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{
    ConfigMap, MetricDefinition, PluginFilter, PluginInfo, PluginKey, StagePayload,
};
use crate::PulseResult;

/// 可执行的插件实例
#[async_trait]
pub trait PluginInstance: Send + Sync {
    /// 执行一个阶段
    ///
    /// - 采集插件：输入为待采集的指标（值为空），输出为采集结果
    /// - 处理插件：输入为上一阶段的输出
    /// - 发布插件：输入为最后一个处理阶段的输出，返回值被忽略
    async fn run(&self, input: StagePayload, config: &ConfigMap) -> PulseResult<StagePayload>;
}

/// 插件目录
#[async_trait]
pub trait PluginCatalog: Send + Sync {
    /// 解析插件标识为可执行实例
    async fn resolve(&self, key: &PluginKey) -> PulseResult<Arc<dyn PluginInstance>>;

    /// 插件能否在本节点加载/运行
    async fn is_loadable(&self, key: &PluginKey) -> bool;

    async fn list(&self, filter: &PluginFilter) -> Vec<PluginInfo>;

    async fn get(&self, key: &PluginKey) -> PulseResult<PluginInfo>;

    /// 加载插件，返回加载后的描述
    async fn load(&self, key: &PluginKey) -> PulseResult<PluginInfo>;

    /// 卸载插件，返回被卸载的描述
    async fn unload(&self, key: &PluginKey) -> PulseResult<PluginInfo>;

    async fn config(&self, key: &PluginKey) -> PulseResult<ConfigMap>;

    /// 合并写入插件级配置项，返回合并后的完整配置
    async fn set_config(&self, key: &PluginKey, items: ConfigMap) -> PulseResult<ConfigMap>;

    /// 删除插件级配置项，返回删除后的完整配置
    async fn delete_config(&self, key: &PluginKey, names: &[String]) -> PulseResult<ConfigMap>;
}

/// 指标目录
#[async_trait]
pub trait MetricCatalog: Send + Sync {
    /// 将命名空间查询解析为可采集的指标定义，没有任何匹配时返回 NotFound/Validation 错误
    async fn resolve(&self, queries: &[String]) -> PulseResult<Vec<MetricDefinition>>;

    async fn list(&self) -> Vec<MetricDefinition>;
}
