//! 随节点一起安装的内置插件
//!
//! | 标识 | 作用 |
//! |------|------|
//! | `collector:mock:1` | 为每个请求的指标生成随机整数 |
//! | `processor:passthru:1` | 原样透传 |
//! | `processor:tag:1` | 把字符串配置项作为标签附加到每条指标 |
//! | `publisher:log:1` | 通过 tracing 输出指标 |
//! | `publisher:file:1` | 以 JSON Lines 追加写入配置项 `file` 指定的文件 |

use std::sync::Arc;

use async_trait::async_trait;
use pulse_core::models::{ConfigMap, ConfigValue, PluginKey, StagePayload};
use pulse_core::{PluginInstance, PulseError, PulseResult};
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tracing::info;

pub struct MockCollector;

#[async_trait]
impl PluginInstance for MockCollector {
    async fn run(&self, input: StagePayload, config: &ConfigMap) -> PulseResult<StagePayload> {
        let upper = match config.get("max") {
            Some(ConfigValue::Int(v)) if *v > 0 => *v,
            _ => 100,
        };
        let mut rng = rand::rng();
        Ok(input
            .into_iter()
            .map(|mut metric| {
                metric.value = serde_json::json!(rng.random_range(0..upper));
                metric.timestamp = chrono::Utc::now();
                metric
            })
            .collect())
    }
}

pub struct PassthruProcessor;

#[async_trait]
impl PluginInstance for PassthruProcessor {
    async fn run(&self, input: StagePayload, _config: &ConfigMap) -> PulseResult<StagePayload> {
        Ok(input)
    }
}

pub struct TagProcessor;

#[async_trait]
impl PluginInstance for TagProcessor {
    async fn run(&self, input: StagePayload, config: &ConfigMap) -> PulseResult<StagePayload> {
        Ok(input
            .into_iter()
            .map(|mut metric| {
                for (key, value) in config {
                    if let ConfigValue::Str(v) = value {
                        metric.tags.insert(key.clone(), v.clone());
                    }
                }
                metric
            })
            .collect())
    }
}

pub struct LogPublisher;

#[async_trait]
impl PluginInstance for LogPublisher {
    async fn run(&self, input: StagePayload, _config: &ConfigMap) -> PulseResult<StagePayload> {
        for metric in &input {
            info!(
                namespace = %metric.namespace,
                value = %metric.value,
                timestamp = %metric.timestamp,
                "发布指标"
            );
        }
        Ok(input)
    }
}

pub struct FilePublisher;

#[async_trait]
impl PluginInstance for FilePublisher {
    async fn run(&self, input: StagePayload, config: &ConfigMap) -> PulseResult<StagePayload> {
        let path = match config.get("file") {
            Some(ConfigValue::Str(path)) if !path.is_empty() => path.clone(),
            _ => return Err(PulseError::validation("file 发布插件缺少配置项 file")),
        };

        let mut buf = Vec::new();
        for metric in &input {
            serde_json::to_writer(&mut buf, metric)?;
            buf.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(input)
    }
}

/// 全部内置插件
pub fn all() -> Vec<(PluginKey, Arc<dyn PluginInstance>)> {
    let plugins: [(PluginKey, Arc<dyn PluginInstance>); 5] = [
        (PluginKey::collector("mock", 1), Arc::new(MockCollector)),
        (PluginKey::processor("passthru", 1), Arc::new(PassthruProcessor)),
        (PluginKey::processor("tag", 1), Arc::new(TagProcessor)),
        (PluginKey::publisher("log", 1), Arc::new(LogPublisher)),
        (PluginKey::publisher("file", 1), Arc::new(FilePublisher)),
    ];
    plugins.into()
}
