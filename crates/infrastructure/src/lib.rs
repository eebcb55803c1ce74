//! 基础设施层：插件/指标目录的内存实现、任务定义持久化，以及指标采集。

pub mod builtin_plugins;
pub mod metric_catalog;
pub mod observability;
pub mod plugin_catalog;
pub mod storage;

pub use metric_catalog::InMemoryMetricCatalog;
pub use observability::{init_metrics_exporter, MetricsCollector};
pub use plugin_catalog::InMemoryPluginCatalog;
pub use storage::{JsonFileStore, MemoryStore};
