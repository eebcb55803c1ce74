use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plugin::PluginKey;

/// 指标目录中的可采集指标定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// 以 `/` 分隔的命名空间，例如 `/intel/mock/foo`
    pub namespace: String,
    pub version: u32,
    pub unit: Option<String>,
    pub description: Option<String>,
    /// 提供该指标的采集插件
    pub collector: Option<PluginKey>,
}

impl MetricDefinition {
    pub fn new(namespace: impl Into<String>, version: u32) -> Self {
        Self {
            namespace: namespace.into(),
            version,
            unit: None,
            description: None,
            collector: None,
        }
    }

    pub fn with_collector(mut self, collector: PluginKey) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// 工作流阶段之间传递的单条指标数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub namespace: String,
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
}

impl Metric {
    pub fn new(namespace: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            namespace: namespace.into(),
            value,
            timestamp: Utc::now(),
            tags: BTreeMap::new(),
        }
    }

    /// 由指标定义生成一个待采集的空指标
    pub fn requested(definition: &MetricDefinition) -> Self {
        Self::new(definition.namespace.clone(), serde_json::Value::Null)
    }
}

/// 阶段输入/输出载荷
pub type StagePayload = Vec<Metric>;

/// 判断命名空间是否匹配查询
///
/// 查询中的 `*` 匹配任意单个层级，结尾的 `**` 匹配剩余任意层级。
pub fn namespace_matches(query: &str, namespace: &str) -> bool {
    let q: Vec<&str> = query.trim_matches('/').split('/').collect();
    let n: Vec<&str> = namespace.trim_matches('/').split('/').collect();

    for (i, part) in q.iter().enumerate() {
        if *part == "**" {
            return i == q.len() - 1;
        }
        match n.get(i) {
            Some(seg) if *part == "*" || part == seg => continue,
            _ => return false,
        }
    }
    q.len() == n.len()
}
