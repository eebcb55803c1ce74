//! 任务状态机、调度计时器与任务管理器

pub mod cron_utils;
pub mod executor;
pub mod lifecycle;
pub mod manager;
pub mod timer;
pub mod watch;

pub use executor::{RunReport, WorkflowExecutor};
pub use manager::{FireOutcome, TaskManager};
pub use watch::{TaskWatcher, WatchHub};
