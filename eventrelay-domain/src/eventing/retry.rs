//! 重试策略（RetryStrategy）
//!
//! 封闭的策略集合，在每个决策点穷尽匹配：
//! - `ExponentialBackoff`：按尝试次数查延迟表（默认 1/5/15/30/60 分钟），
//!   超出表长后保持最大延迟；
//! - `ExternalScheduler`：重试由外部调度器驱动，`next_retry_time` 仅用于记录展示，
//!   次数上限交由外部配置，因此 `should_retry` 恒为真。
//!
use crate::error::{DomainError, DomainResult};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

const MINUTE: u64 = 60;

/// 默认延迟表（分钟）
pub const DEFAULT_BACKOFF_MINUTES: [u64; 5] = [1, 5, 15, 30, 60];

/// 指数退避延迟表
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExponentialBackoff {
    delays: Vec<Duration>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            delays: DEFAULT_BACKOFF_MINUTES
                .iter()
                .map(|m| Duration::from_secs(m * MINUTE))
                .collect(),
        }
    }
}

impl ExponentialBackoff {
    /// 自定义延迟表，至少包含一项
    pub fn new(delays: Vec<Duration>) -> DomainResult<Self> {
        if delays.is_empty() {
            return Err(DomainError::InvalidValue {
                reason: "backoff delay table must not be empty".to_string(),
            });
        }
        Ok(Self { delays })
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// 第 `attempt` 次尝试失败后的延迟：下标为 `min(attempt - 1, len - 1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let last = self.delays.len().saturating_sub(1);
        let index = (attempt.saturating_sub(1) as usize).min(last);
        self.delays.get(index).copied().unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryStrategy {
    ExponentialBackoff(ExponentialBackoff),
    ExternalScheduler { interval: Duration },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::ExponentialBackoff(ExponentialBackoff::default())
    }
}

impl RetryStrategy {
    pub fn external(interval: Duration) -> Self {
        RetryStrategy::ExternalScheduler { interval }
    }

    /// 当前尝试失败后等待的时长
    pub fn delay(&self, current_attempt: u32) -> Duration {
        match self {
            RetryStrategy::ExponentialBackoff(backoff) => backoff.delay_for(current_attempt),
            RetryStrategy::ExternalScheduler { interval } => *interval,
        }
    }

    pub fn next_retry_time(&self, current_attempt: u32) -> DateTime<Utc> {
        self.next_retry_time_from(current_attempt, Utc::now())
    }

    pub fn next_retry_time_from(&self, current_attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = TimeDelta::from_std(self.delay(current_attempt)).unwrap_or(TimeDelta::MAX);
        now.checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn should_retry(&self, current_attempt: u32, max_attempts: u32) -> bool {
        match self {
            RetryStrategy::ExponentialBackoff(_) => current_attempt < max_attempts,
            RetryStrategy::ExternalScheduler { .. } => true,
        }
    }
}
