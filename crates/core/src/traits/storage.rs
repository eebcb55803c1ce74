use async_trait::async_trait;

use crate::models::{Task, TaskId, TribeSnapshot};
use crate::PulseResult;

/// 任务与复制状态的持久化接口
///
/// 核心只要求定义在进程重启后保留最后已知的状态和计数，
/// 具体存储格式由实现决定。
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save_task(&self, task: &Task) -> PulseResult<()>;

    async fn delete_task(&self, id: &TaskId) -> PulseResult<()>;

    async fn load_tasks(&self) -> PulseResult<Vec<Task>>;

    async fn save_tribe_snapshot(&self, snapshot: &TribeSnapshot) -> PulseResult<()>;

    /// 从未保存过时返回 `None`
    async fn load_tribe_snapshot(&self) -> PulseResult<Option<TribeSnapshot>>;
}
