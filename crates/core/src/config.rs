use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use ::config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub scheduler: SchedulerConfig,
    pub tribe: TribeConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub observability: ObservabilityConfig,
}

/// 本节点身份
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// 成员名，集群内唯一；为空时使用主机名
    pub name: String,
    pub tags: BTreeMap<String, String>,
}

/// 任务调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 连续失败多少次后自动禁用任务
    pub failure_threshold: u32,
    /// 未指定时的单次执行期限
    pub default_deadline_ms: u64,
    /// 每个 watch 订阅者的队列容量
    pub watch_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            default_deadline_ms: 5_000,
            watch_buffer: 256,
        }
    }
}

impl SchedulerConfig {
    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(anyhow::anyhow!("失败阈值必须大于0"));
        }
        if self.default_deadline_ms == 0 {
            return Err(anyhow::anyhow!("默认执行期限必须大于0"));
        }
        if self.watch_buffer == 0 {
            return Err(anyhow::anyhow!("watch 队列容量必须大于0"));
        }
        Ok(())
    }
}

/// 部落(tribe) gossip 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TribeConfig {
    pub enabled: bool,
    /// 启动时联系的种子节点地址
    pub seeds: Vec<String>,
    pub gossip_interval_ms: u64,
    /// 每轮 gossip 选择的对端数量
    pub fanout: usize,
    /// 同时进行的交换数上限
    pub max_concurrent_exchanges: usize,
    pub request_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// 连续错过多少个心跳周期后标记为 Suspect
    pub suspect_after_missed: u32,
    /// Suspect 持续多久后标记为 Dead
    pub dead_timeout_ms: u64,
    /// 与对端摘要持续不一致多久后告警
    pub divergence_threshold_ms: u64,
    /// 并发写入同一资源时保留哪个发起者的值
    pub tie_break: TieBreakRule,
    pub retry: RetryConfig,
}

/// 并发写入的裁决规则，按发起者成员名比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakRule {
    #[default]
    HighestOrigin,
    LowestOrigin,
}

impl Default for TribeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seeds: Vec::new(),
            gossip_interval_ms: 1_000,
            fanout: 3,
            max_concurrent_exchanges: 4,
            request_timeout_ms: 2_000,
            heartbeat_interval_ms: 1_000,
            suspect_after_missed: 3,
            dead_timeout_ms: 10_000,
            divergence_threshold_ms: 30_000,
            tie_break: TieBreakRule::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl TribeConfig {
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn dead_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_timeout_ms)
    }

    pub fn divergence_threshold(&self) -> Duration {
        Duration::from_millis(self.divergence_threshold_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gossip_interval_ms == 0 || self.heartbeat_interval_ms == 0 {
            return Err(anyhow::anyhow!("gossip 与心跳间隔必须大于0"));
        }
        if self.fanout == 0 || self.max_concurrent_exchanges == 0 {
            return Err(anyhow::anyhow!("fanout 与并发交换数必须大于0"));
        }
        if self.suspect_after_missed == 0 {
            return Err(anyhow::anyhow!("suspect_after_missed 必须大于0"));
        }
        if self.request_timeout_ms == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }
        self.retry.validate()
    }
}

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// 基础重试间隔（毫秒）
    pub base_interval_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_interval_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_interval_ms: 100,
            max_interval_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动系数必须在0到1之间"));
        }
        if self.max_interval_ms < self.base_interval_ms {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础间隔"));
        }
        Ok(())
    }
}

/// gossip HTTP 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
    /// 对外通告的地址，为空时使用 bind_address
    pub advertise_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:6000".to_string(),
            advertise_address: String::new(),
        }
    }
}

impl ApiConfig {
    pub fn advertised(&self) -> &str {
        if self.advertise_address.is_empty() {
            &self.bind_address
        } else {
            &self.advertise_address
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_address
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("无效的监听地址: {}", self.bind_address))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 为空时仅保存在内存中
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// `json` 或 `pretty`
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_bind_address: "127.0.0.1:9090".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> Result<()> {
        let levels = ["trace", "debug", "info", "warn", "error"];
        if !levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!("无效的日志级别: {}", self.log_level));
        }
        if !["json", "pretty"].contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!("不支持的日志格式: {}", self.log_format));
        }
        if self.metrics_enabled {
            self.metrics_bind_address
                .parse::<std::net::SocketAddr>()
                .with_context(|| format!("无效的指标监听地址: {}", self.metrics_bind_address))?;
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: PULSE_, nested keys separated by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/pulse.toml", "pulse.toml", "/etc/pulse/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("PULSE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("tribe.seeds")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate().context("调度配置验证失败")?;
        self.tribe.validate().context("部落配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        Ok(())
    }
}
