use async_trait::async_trait;
use pulse_core::models::{namespace_matches, MetricDefinition, PluginKey};
use pulse_core::{MetricCatalog, PulseError, PulseResult};
use tokio::sync::RwLock;

/// 进程内指标目录
pub struct InMemoryMetricCatalog {
    definitions: RwLock<Vec<MetricDefinition>>,
}

impl InMemoryMetricCatalog {
    pub fn new(definitions: Vec<MetricDefinition>) -> Self {
        Self {
            definitions: RwLock::new(definitions),
        }
    }

    /// 内置 mock 采集插件提供的指标
    pub fn with_builtins() -> Self {
        let mock = PluginKey::collector("mock", 1);
        Self::new(vec![
            MetricDefinition::new("/intel/mock/foo", 1).with_collector(mock.clone()),
            MetricDefinition::new("/intel/mock/bar", 1).with_collector(mock.clone()),
            MetricDefinition::new("/intel/mock/host/cpu", 1)
                .with_collector(mock)
                .with_unit("percent"),
        ])
    }

    pub async fn register(&self, definition: MetricDefinition) {
        let mut definitions = self.definitions.write().await;
        definitions.retain(|d| d.namespace != definition.namespace);
        definitions.push(definition);
    }
}

#[async_trait]
impl MetricCatalog for InMemoryMetricCatalog {
    async fn resolve(&self, queries: &[String]) -> PulseResult<Vec<MetricDefinition>> {
        let definitions = self.definitions.read().await;
        let mut resolved: Vec<MetricDefinition> = Vec::new();

        for query in queries {
            let matched: Vec<&MetricDefinition> = definitions
                .iter()
                .filter(|d| namespace_matches(query, &d.namespace))
                .collect();
            if matched.is_empty() {
                return Err(PulseError::validation(format!(
                    "指标命名空间没有匹配的指标: {query}"
                )));
            }
            for definition in matched {
                if !resolved.iter().any(|d| d.namespace == definition.namespace) {
                    resolved.push(definition.clone());
                }
            }
        }

        Ok(resolved)
    }

    async fn list(&self) -> Vec<MetricDefinition> {
        let mut definitions = self.definitions.read().await.clone();
        definitions.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        definitions
    }
}
