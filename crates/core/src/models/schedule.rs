use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{PulseError, PulseResult};

/// 调度策略
///
/// - `Simple`: 固定间隔触发
/// - `Windowed`: 在 `[start, stop]` 时间窗口内按固定间隔触发，窗口结束后任务进入 Ended
/// - `Cron`: CRON 表达式，每次装载时从"当前时间"计算下一次触发点
/// - `Streaming`: 事件驱动，仅在显式 trigger 时触发
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schedule {
    Simple {
        #[serde(with = "super::duration_ms", rename = "interval_ms")]
        interval: Duration,
    },
    Windowed {
        #[serde(with = "super::duration_ms", rename = "interval_ms")]
        interval: Duration,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
    },
    Cron {
        expression: String,
    },
    Streaming,
}

impl Schedule {
    pub fn simple(interval: Duration) -> Self {
        Schedule::Simple { interval }
    }

    pub fn windowed(
        interval: Duration,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
    ) -> Self {
        Schedule::Windowed {
            interval,
            start,
            stop,
        }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Schedule::Cron {
            expression: expression.into(),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            Schedule::Simple { interval } | Schedule::Windowed { interval, .. } => Some(*interval),
            _ => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Schedule::Streaming)
    }

    /// 与时间无关的结构校验；CRON 表达式的可解析性由调度器校验
    pub fn validate_shape(&self, now: DateTime<Utc>) -> PulseResult<()> {
        match self {
            Schedule::Simple { interval } => {
                if interval.is_zero() {
                    return Err(PulseError::validation("调度间隔必须大于0"));
                }
            }
            Schedule::Windowed {
                interval,
                start,
                stop,
            } => {
                if interval.is_zero() {
                    return Err(PulseError::validation("调度间隔必须大于0"));
                }
                if let (Some(start), Some(stop)) = (start, stop) {
                    if stop <= start {
                        return Err(PulseError::validation("窗口结束时间必须晚于开始时间"));
                    }
                }
                if let Some(stop) = stop {
                    if *stop <= now {
                        return Err(PulseError::validation("窗口结束时间已经过去"));
                    }
                }
            }
            Schedule::Cron { expression } => {
                if expression.trim().is_empty() {
                    return Err(PulseError::validation("CRON表达式不能为空"));
                }
            }
            Schedule::Streaming => {}
        }
        Ok(())
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Simple { interval } => write!(f, "simple({}ms)", interval.as_millis()),
            Schedule::Windowed { interval, .. } => {
                write!(f, "windowed({}ms)", interval.as_millis())
            }
            Schedule::Cron { expression } => write!(f, "cron({expression})"),
            Schedule::Streaming => write!(f, "streaming"),
        }
    }
}
