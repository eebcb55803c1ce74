//! 调度计时
//!
//! 每个装载中的任务拥有一个 [`FirePlan`]，计时循环反复调用
//! [`FirePlan::next`] 等待下一次到期。计划本身不关心任务状态，
//! 是否真正执行由任务管理器在到期时判断。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use pulse_core::models::Schedule;
use pulse_core::{PulseError, PulseResult};

use crate::cron_utils::CronScheduler;

/// 校验调度策略，CRON 表达式必须可解析并且存在未来的触发时间
pub fn validate_schedule(schedule: &Schedule, now: DateTime<Utc>) -> PulseResult<()> {
    schedule.validate_shape(now)?;
    if let Schedule::Cron { expression } = schedule {
        let cron = CronScheduler::new(expression)?;
        if cron.next_execution_time(now).is_none() {
            return Err(PulseError::InvalidCron {
                expr: expression.clone(),
                message: "没有未来的触发时间".to_string(),
            });
        }
    }
    Ok(())
}

/// 一次等待的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Due,
    /// 调度已耗尽（窗口结束或 CRON 没有后续时间点），任务应进入 Ended
    Exhausted,
}

pub enum FirePlan {
    /// Simple / Windowed：固定速率，落后时跳过错过的时间点
    ///
    /// 跳过的时间点不计入 `remaining`，因此每次到期还要对照 `stop`。
    Fixed {
        ticker: Interval,
        remaining: Option<u64>,
        stop: Option<DateTime<Utc>>,
    },
    Cron(CronScheduler),
    Streaming(Arc<Notify>),
}

impl FirePlan {
    /// 以当前时间装载计划
    ///
    /// 窗口开始时间在未来时首次触发落在开始时间，否则在一个间隔之后；
    /// 有结束时间时预先算出窗口内剩余的触发次数。
    pub fn arm(schedule: &Schedule, trigger: Arc<Notify>, now: DateTime<Utc>) -> PulseResult<Self> {
        match schedule {
            Schedule::Simple { interval } => Ok(Self::fixed(*interval, *interval, None, None)),
            Schedule::Windowed {
                interval,
                start,
                stop,
            } => {
                let first_delay = match start {
                    Some(start) if *start > now => (*start - now).to_std().unwrap_or(*interval),
                    _ => *interval,
                };
                let remaining = stop.map(|stop| windowed_fires(now, first_delay, *interval, stop));
                Ok(Self::fixed(first_delay, *interval, remaining, *stop))
            }
            Schedule::Cron { expression } => Ok(FirePlan::Cron(CronScheduler::new(expression)?)),
            Schedule::Streaming => Ok(FirePlan::Streaming(trigger)),
        }
    }

    fn fixed(
        first_delay: Duration,
        period: Duration,
        remaining: Option<u64>,
        stop: Option<DateTime<Utc>>,
    ) -> Self {
        let mut ticker = interval_at(Instant::now() + first_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        FirePlan::Fixed {
            ticker,
            remaining,
            stop,
        }
    }

    /// 等待下一次到期
    pub async fn next(&mut self) -> Tick {
        match self {
            FirePlan::Fixed {
                ticker,
                remaining,
                stop,
            } => {
                if *remaining == Some(0) {
                    return Tick::Exhausted;
                }
                ticker.tick().await;
                if stop.is_some_and(|stop| Utc::now() > stop) {
                    *remaining = Some(0);
                    return Tick::Exhausted;
                }
                if let Some(left) = remaining {
                    *left -= 1;
                }
                Tick::Due
            }
            FirePlan::Cron(cron) => match cron.time_until_next_execution(Utc::now()) {
                Some(wait) => {
                    tokio::time::sleep(wait).await;
                    Tick::Due
                }
                None => Tick::Exhausted,
            },
            FirePlan::Streaming(trigger) => {
                trigger.notified().await;
                Tick::Due
            }
        }
    }

    /// 本次到期之后是否还会有下一次
    pub fn is_exhausted(&self) -> bool {
        matches!(self, FirePlan::Fixed { remaining: Some(0), .. })
    }
}

/// 窗口 `[now + first_delay, stop]` 内的触发次数
fn windowed_fires(
    now: DateTime<Utc>,
    first_delay: Duration,
    period: Duration,
    stop: DateTime<Utc>,
) -> u64 {
    let Ok(until_stop) = (stop - now).to_std() else {
        return 0;
    };
    if first_delay > until_stop {
        return 0;
    }
    ((until_stop - first_delay).as_nanos() / period.as_nanos().max(1)) as u64 + 1
}
