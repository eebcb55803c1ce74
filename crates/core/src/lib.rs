//! # pulse-core
//!
//! 遥测任务调度与部落(tribe)协同系统的公共基础：错误类型、数据模型、
//! 配置、日志初始化，以及核心与外部协作方（插件目录、指标目录、存储）
//! 之间的接口。

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use models::{
    Agreement, EventKind, GossipEvent, Member, MemberStatus, PluginKey, PluginType, Schedule,
    Stage, StageKind, Task, TaskDefinition, TaskEvent, TaskId, TaskOrigin, TaskSpec, TaskState,
    VersionVector, Workflow,
};
pub use traits::{LocalTaskPort, MetricCatalog, PluginCatalog, PluginInstance, TaskStore};
