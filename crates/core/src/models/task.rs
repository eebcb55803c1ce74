use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schedule::Schedule;
use super::workflow::Workflow;

/// 任务唯一标识，集群范围内唯一
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 任务生命周期状态
///
/// ```text
///            start            fire
/// Stopped ─────────► Spinning ─────► Running
///    ▲  ▲               │  ▲            │
///    │  └──── stop ─────┘  └── 完成 ────┤
///    │                                  ├──► Ended (窗口耗尽)
///  enable                               │
///    │                                  │
/// Disabled ◄──── disable / 连续失败 ─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Stopped,
    Spinning,
    Running,
    Disabled,
    Ended,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Stopped => "Stopped",
            TaskState::Spinning => "Spinning",
            TaskState::Running => "Running",
            TaskState::Disabled => "Disabled",
            TaskState::Ended => "Ended",
        }
    }

    /// 处于装载（会被调度器触发）的状态
    pub fn is_armed(&self) -> bool {
        matches!(self, TaskState::Spinning | TaskState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Ended)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务来源：本地创建，或经由某个 agreement 复制而来
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum TaskOrigin {
    Local,
    Agreement(String),
}

/// 可在集群内复制的任务定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    pub name: String,
    pub workflow: Workflow,
    pub schedule: Schedule,
    #[serde(with = "super::duration_ms", rename = "deadline_ms")]
    pub deadline: Duration,
}

/// 创建任务的请求参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: Option<String>,
    pub workflow: Workflow,
    pub schedule: Schedule,
    /// 单次执行允许的最长耗时，缺省使用调度器配置
    #[serde(default, with = "super::duration_ms::option", rename = "deadline_ms")]
    pub deadline: Option<Duration>,
    /// 创建后立即启动
    #[serde(default)]
    pub start: bool,
}

/// 任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub workflow: Workflow,
    pub schedule: Schedule,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub last_fire_at: Option<DateTime<Utc>>,
    pub hit_count: u64,
    pub miss_count: u64,
    pub failed_count: u64,
    pub consecutive_failures: u32,
    #[serde(with = "super::duration_ms", rename = "deadline_ms")]
    pub deadline: Duration,
    pub last_failure: Option<String>,
    pub disabled_reason: Option<String>,
    pub origins: BTreeSet<TaskOrigin>,
}

impl Task {
    pub fn from_definition(definition: TaskDefinition, origin: TaskOrigin) -> Self {
        Self {
            id: definition.id,
            name: definition.name,
            workflow: definition.workflow,
            schedule: definition.schedule,
            state: TaskState::Stopped,
            created_at: Utc::now(),
            last_fire_at: None,
            hit_count: 0,
            miss_count: 0,
            failed_count: 0,
            consecutive_failures: 0,
            deadline: definition.deadline,
            last_failure: None,
            disabled_reason: None,
            origins: BTreeSet::from([origin]),
        }
    }

    pub fn definition(&self) -> TaskDefinition {
        TaskDefinition {
            id: self.id.clone(),
            name: self.name.clone(),
            workflow: self.workflow.clone(),
            schedule: self.schedule.clone(),
            deadline: self.deadline,
        }
    }

    /// 替换可复制的定义部分，状态与计数保持不变
    pub fn redefine(&mut self, definition: TaskDefinition) {
        self.name = definition.name;
        self.workflow = definition.workflow;
        self.schedule = definition.schedule;
        self.deadline = definition.deadline;
    }

    pub fn has_origin(&self, origin: &TaskOrigin) -> bool {
        self.origins.contains(origin)
    }
}

/// 任务过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
    pub name_pattern: Option<String>,
}

impl TaskFilter {
    pub fn by_state(state: TaskState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.state.is_none_or(|s| s == task.state)
            && self
                .name_pattern
                .as_deref()
                .is_none_or(|p| task.name.contains(p))
    }
}

/// watch 订阅者收到的任务事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    FireStarted {
        task_id: TaskId,
        at: DateTime<Utc>,
    },
    FireCompleted {
        task_id: TaskId,
        at: DateTime<Utc>,
        duration_ms: u64,
        metrics: usize,
    },
    FireFailed {
        task_id: TaskId,
        at: DateTime<Utc>,
        error: String,
        consecutive_failures: u32,
    },
    /// 上一次执行尚未结束，本次到期的触发被跳过并计为 miss
    FireSkipped {
        task_id: TaskId,
        at: DateTime<Utc>,
    },
    StateChanged {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },
    /// 订阅者消费过慢，最早的 `dropped` 条事件被丢弃
    Gap {
        dropped: u64,
    },
}
