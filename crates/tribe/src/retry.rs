//! gossip 请求的指数退避重试
//!
//! 只有网络类错误会被重试，其余错误立即返回。

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use pulse_core::config::RetryConfig;
use pulse_core::PulseResult;

/// 计算第 `attempt` 次重试（从0开始）前的等待时间
///
/// 间隔按 `base * multiplier^attempt` 增长，封顶于 `max_interval`，
/// 再叠加 ±`jitter_factor` 比例的随机抖动。
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base_interval = config.base_interval_ms as f64;
    let multiplier = config.backoff_multiplier;
    let max_interval = config.max_interval_ms as f64;

    let exponential_interval = base_interval * multiplier.powi(attempt as i32);
    let capped_interval = exponential_interval.min(max_interval);

    let jitter_factor = config.jitter_factor;
    let jitter = capped_interval * jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
    let final_interval = (capped_interval + jitter).max(0.0);

    Duration::from_millis(final_interval as u64)
}

/// 执行 `operation`，网络错误时按退避策略重试，最多尝试 `max_attempts` 次
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut f: F,
) -> PulseResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PulseResult<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < config.max_attempts => {
                let delay = backoff_delay(config, attempt);
                debug!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "请求失败，稍后重试"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(operation, attempts = attempt + 1, error = %e, "重试次数已用尽");
                }
                return Err(e);
            }
        }
    }
}
