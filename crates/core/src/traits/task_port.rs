use async_trait::async_trait;

use crate::models::{TaskDefinition, TaskId};
use crate::PulseResult;

/// 部落(tribe)本地应用任务变更的端口
///
/// Tribe Manager 不直接修改任务状态，所有变更都经过任务管理器的
/// 按任务互斥路径。
#[async_trait]
pub trait LocalTaskPort: Send + Sync {
    /// 读取本地任务的可复制定义
    async fn describe(&self, id: &TaskId) -> PulseResult<TaskDefinition>;

    /// 以 agreement 来源接管任务：不存在则创建，随后启动
    async fn adopt(&self, definition: TaskDefinition, agreement: &str) -> PulseResult<()>;

    /// 解除 agreement 来源：停止任务，若不再有其他来源则删除
    async fn release(&self, id: &TaskId, agreement: &str) -> PulseResult<()>;
}
