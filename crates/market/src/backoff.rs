use kizashi_core::config::ReconnectConfig;
use std::time::Duration;

/// # Summary
/// 指数退避重连策略。
///
/// # Invariants
/// - 第 n 次（从 1 开始）重连前等待 min(base × 2^n, max)。
/// - 连续失败超过 `max_attempts` 次后不再重连。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// # Summary
    /// 计算第 `attempt` 次连续失败后的等待时间。
    ///
    /// # Logic
    /// 1. `attempt` 为 0 或超过上限时返回 None，表示放弃重连。
    /// 2. 否则按 base × 2^attempt 计算并截断到 `max_delay`，溢出时直接取 `max_delay`。
    ///
    /// # Arguments
    /// * `attempt`: 连续失败次数。
    ///
    /// # Returns
    /// 等待时间，None 表示进入终态。
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let delay = 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay));
        Some(delay)
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}
