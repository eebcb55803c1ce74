//! 任务状态机
//!
//! 这里的函数只修改传入的 [`Task`]，不涉及计时器和持久化；调用方
//! 必须持有该任务的互斥锁。返回 `Some(Transition)` 表示状态发生了变化。

use chrono::Utc;

use pulse_core::models::{Task, TaskState};
use pulse_core::{PulseError, PulseResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TaskState,
    pub to: TaskState,
}

fn move_to(task: &mut Task, to: TaskState) -> Option<Transition> {
    let from = task.state;
    if from == to {
        return None;
    }
    task.state = to;
    Some(Transition { from, to })
}

/// Stopped → Spinning；已装载时幂等
pub fn start(task: &mut Task) -> PulseResult<Option<Transition>> {
    match task.state {
        TaskState::Stopped => Ok(move_to(task, TaskState::Spinning)),
        TaskState::Spinning | TaskState::Running => Ok(None),
        TaskState::Disabled | TaskState::Ended => {
            Err(PulseError::invalid_state(&task.id, task.state, "start"))
        }
    }
}

/// Spinning/Running → Stopped；已停止时幂等
pub fn stop(task: &mut Task) -> PulseResult<Option<Transition>> {
    match task.state {
        TaskState::Spinning | TaskState::Running => Ok(move_to(task, TaskState::Stopped)),
        TaskState::Stopped => Ok(None),
        TaskState::Disabled | TaskState::Ended => {
            Err(PulseError::invalid_state(&task.id, task.state, "stop"))
        }
    }
}

/// Disabled → Stopped，并清零连续失败计数
pub fn enable(task: &mut Task) -> PulseResult<Option<Transition>> {
    match task.state {
        TaskState::Disabled => {
            task.disabled_reason = None;
            task.consecutive_failures = 0;
            Ok(move_to(task, TaskState::Stopped))
        }
        _ => Err(PulseError::invalid_state(&task.id, task.state, "enable")),
    }
}

/// 任意非终止状态 → Disabled；已禁用时只更新原因
pub fn disable(task: &mut Task, reason: impl Into<String>) -> PulseResult<Option<Transition>> {
    if task.state.is_terminal() {
        return Err(PulseError::invalid_state(&task.id, task.state, "disable"));
    }
    task.disabled_reason = Some(reason.into());
    Ok(move_to(task, TaskState::Disabled))
}

/// 到期时的处理决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    Fire,
    /// 上一次执行尚未结束
    Skip,
    /// 任务已不在装载状态
    Ignore,
}

/// 到期：Spinning → Running；执行中到期计为一次 miss
pub fn begin_fire(task: &mut Task, in_flight: bool) -> FireDecision {
    match task.state {
        TaskState::Spinning if !in_flight => {
            task.state = TaskState::Running;
            task.last_fire_at = Some(Utc::now());
            FireDecision::Fire
        }
        TaskState::Spinning | TaskState::Running => {
            task.miss_count += 1;
            FireDecision::Skip
        }
        _ => FireDecision::Ignore,
    }
}

/// 记录一次执行结果
///
/// 失败次数达到阈值时自动禁用。执行期间被停止或禁用的任务保持当前状态，
/// 只更新计数；仍为 Running 的任务回到 Spinning。调度耗尽时装载中的任务进入 Ended，
/// 包括执行期间被停止又重新启动、最后一次到期因此被跳过的任务。
pub fn complete_fire(
    task: &mut Task,
    result: Result<(), &str>,
    failure_threshold: u32,
    exhausted: bool,
) -> Option<Transition> {
    match result {
        Ok(()) => {
            task.hit_count += 1;
            task.consecutive_failures = 0;
        }
        Err(error) => {
            task.miss_count += 1;
            task.failed_count += 1;
            task.consecutive_failures += 1;
            task.last_failure = Some(error.to_string());

            if failure_threshold > 0
                && task.consecutive_failures >= failure_threshold
                && !matches!(task.state, TaskState::Disabled | TaskState::Ended)
            {
                task.disabled_reason = Some(format!(
                    "连续失败{}次，已自动禁用",
                    task.consecutive_failures
                ));
                return move_to(task, TaskState::Disabled);
            }
        }
    }

    match task.state {
        TaskState::Running | TaskState::Spinning if exhausted => move_to(task, TaskState::Ended),
        TaskState::Running => {
            task.state = TaskState::Spinning;
            None
        }
        _ => None,
    }
}

/// 调度耗尽且没有执行中的触发：Spinning → Ended
pub fn exhaust(task: &mut Task) -> Option<Transition> {
    match task.state {
        TaskState::Spinning => move_to(task, TaskState::Ended),
        _ => None,
    }
}
