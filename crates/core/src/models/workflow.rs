use serde::{Deserialize, Serialize};

use super::plugin::{ConfigMap, ConfigValue, PluginKey, PluginType};
use crate::errors::{PulseError, PulseResult};

/// 工作流阶段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Collect,
    Process,
    Publish,
}

impl StageKind {
    /// 每种阶段只能引用对应类型的插件
    pub fn plugin_type(&self) -> PluginType {
        match self {
            StageKind::Collect => PluginType::Collector,
            StageKind::Process => PluginType::Processor,
            StageKind::Publish => PluginType::Publisher,
        }
    }
}

/// 工作流中的单个阶段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub kind: StageKind,
    pub plugin: PluginKey,
    #[serde(default)]
    pub config: ConfigMap,
    /// 采集阶段请求的指标命名空间查询
    #[serde(default)]
    pub metrics: Vec<String>,
}

impl Stage {
    pub fn collect(plugin: PluginKey, metrics: Vec<String>) -> Self {
        Self {
            kind: StageKind::Collect,
            plugin,
            config: ConfigMap::new(),
            metrics,
        }
    }

    pub fn process(plugin: PluginKey) -> Self {
        Self {
            kind: StageKind::Process,
            plugin,
            config: ConfigMap::new(),
            metrics: Vec::new(),
        }
    }

    pub fn publish(plugin: PluginKey) -> Self {
        Self {
            kind: StageKind::Publish,
            plugin,
            config: ConfigMap::new(),
            metrics: Vec::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// 工作流定义
///
/// 有序的阶段流水线：恰好一个采集阶段，随后零个或多个处理阶段，
/// 最后一个或多个发布阶段。任务创建后不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub stages: Vec<Stage>,
}

impl Workflow {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn collect_stage(&self) -> Option<&Stage> {
        self.stages.first().filter(|s| s.kind == StageKind::Collect)
    }

    pub fn process_stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(|s| s.kind == StageKind::Process)
    }

    pub fn publish_stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(|s| s.kind == StageKind::Publish)
    }

    /// 工作流引用的全部插件
    pub fn plugins(&self) -> impl Iterator<Item = &PluginKey> {
        self.stages.iter().map(|s| &s.plugin)
    }

    /// 结构校验：阶段顺序、阶段与插件类型一致、采集阶段至少请求一个指标
    pub fn validate(&self) -> PulseResult<()> {
        if self.stages.is_empty() {
            return Err(PulseError::validation("工作流不能为空"));
        }

        let collect = &self.stages[0];
        if collect.kind != StageKind::Collect {
            return Err(PulseError::validation("工作流的第一个阶段必须是采集阶段"));
        }
        if collect.metrics.is_empty() {
            return Err(PulseError::validation("采集阶段至少需要请求一个指标"));
        }

        let mut seen_publish = false;
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.kind.plugin_type() != stage.plugin.plugin_type {
                return Err(PulseError::validation(format!(
                    "第 {index} 个阶段类型为 {:?}，但引用了 {} 插件",
                    stage.kind, stage.plugin.plugin_type
                )));
            }
            match stage.kind {
                StageKind::Collect if index > 0 => {
                    return Err(PulseError::validation("工作流只能包含一个采集阶段"));
                }
                StageKind::Process if seen_publish => {
                    return Err(PulseError::validation("处理阶段不能出现在发布阶段之后"));
                }
                StageKind::Publish => seen_publish = true,
                _ => {}
            }
        }

        if !seen_publish {
            return Err(PulseError::validation("工作流至少需要一个发布阶段"));
        }

        Ok(())
    }
}
