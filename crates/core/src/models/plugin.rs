use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{PulseError, PulseResult};

/// 插件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Collector,
    Processor,
    Publisher,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Collector => "collector",
            PluginType::Processor => "processor",
            PluginType::Publisher => "publisher",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = PulseError;

    fn from_str(s: &str) -> PulseResult<Self> {
        match s.to_lowercase().as_str() {
            "collector" => Ok(PluginType::Collector),
            "processor" => Ok(PluginType::Processor),
            "publisher" => Ok(PluginType::Publisher),
            _ => Err(PulseError::validation(format!("未知的插件类型: {s}"))),
        }
    }
}

/// 插件标识：类型 + 名称 + 版本
///
/// 文本形式为 `type:name:version`，例如 `collector:mock:1`。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PluginKey {
    pub plugin_type: PluginType,
    pub name: String,
    pub version: u32,
}

impl PluginKey {
    pub fn new(plugin_type: PluginType, name: impl Into<String>, version: u32) -> Self {
        Self {
            plugin_type,
            name: name.into(),
            version,
        }
    }

    pub fn collector(name: impl Into<String>, version: u32) -> Self {
        Self::new(PluginType::Collector, name, version)
    }

    pub fn processor(name: impl Into<String>, version: u32) -> Self {
        Self::new(PluginType::Processor, name, version)
    }

    pub fn publisher(name: impl Into<String>, version: u32) -> Self {
        Self::new(PluginType::Publisher, name, version)
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.plugin_type, self.name, self.version)
    }
}

impl FromStr for PluginKey {
    type Err = PulseError;

    fn from_str(s: &str) -> PulseResult<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[1].is_empty() {
            return Err(PulseError::validation(format!(
                "插件标识格式应为 type:name:version，实际为: {s}"
            )));
        }
        let version = parts[2]
            .parse::<u32>()
            .map_err(|_| PulseError::validation(format!("无效的插件版本: {}", parts[2])))?;
        Ok(Self::new(parts[0].parse()?, parts[1], version))
    }
}

/// 阶段配置值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ConfigValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Str(v) => write!(f, "{v}"),
            ConfigValue::Int(v) => write!(f, "{v}"),
            ConfigValue::Float(v) => write!(f, "{v}"),
            ConfigValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// 目录中已加载插件的描述信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub key: PluginKey,
    pub signed: bool,
    pub loaded_at: DateTime<Utc>,
    /// 插件级别的默认配置，会被阶段配置覆盖
    pub config: ConfigMap,
}

/// 插件列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct PluginFilter {
    pub plugin_type: Option<PluginType>,
    pub name: Option<String>,
    pub version: Option<u32>,
}

impl PluginFilter {
    pub fn matches(&self, key: &PluginKey) -> bool {
        self.plugin_type.is_none_or(|t| t == key.plugin_type)
            && self.name.as_deref().is_none_or(|n| n == key.name)
            && self.version.is_none_or(|v| v == key.version)
    }
}
