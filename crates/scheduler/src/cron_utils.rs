use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use pulse_core::{PulseError, PulseResult};

/// CRON 调度计算
///
/// 表达式包含秒字段，例如 `0 */5 * * * *` 表示每5分钟。
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> PulseResult<Self> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| PulseError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { schedule })
    }

    /// `from` 之后的下一次到期时间，表达式不再产生时间点时返回 None
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.next_execution_time(now)
            .map(|next| (next - now).to_std().unwrap_or_default())
    }
}
