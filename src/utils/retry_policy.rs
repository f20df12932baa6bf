// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::models::task::FailureCause;
use crate::utils::random::SharedRng;

/// 重试策略配置
///
/// 失败任务不会立刻重跑，而是被放回队列，在一个随机的近期时刻再次执行。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 最短退避时间
    pub min_backoff: Duration,
    /// 最长退避时间
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_backoff: Duration::from_secs(5 * 60),
            max_backoff: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// 创建标准重试策略
    pub fn standard() -> Self {
        Self::default()
    }

    /// 创建快速重试策略（毫秒级退避，用于测试和单次运行）
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        }
    }

    /// 在 [min_backoff, max_backoff] 内随机抽取退避时间
    pub fn calculate_backoff(&self, rng: &SharedRng) -> Duration {
        rng.duration_between(self.min_backoff, self.max_backoff)
    }

    /// 计算下次重试时间
    ///
    /// # 参数
    ///
    /// * `base_time` - 失败发生的时刻
    /// * `rng` - 随机源
    ///
    /// # 返回值
    ///
    /// 返回 `base_time` 加上随机退避后的时间点
    pub fn next_retry_time(&self, base_time: DateTime<Utc>, rng: &SharedRng) -> DateTime<Utc> {
        let backoff = self.calculate_backoff(rng);
        base_time + chrono::Duration::milliseconds(backoff.as_millis() as i64)
    }

    /// 是否应该重试
    pub fn should_retry(&self, retries_remaining: u32, cause: FailureCause) -> bool {
        retries_remaining > 0 && cause.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_backoff_within_bounds() {
        let policy = RetryPolicy::standard();
        let rng = SharedRng::seeded(11);

        for _ in 0..200 {
            let backoff = policy.calculate_backoff(&rng);
            assert!(backoff >= Duration::from_secs(300));
            assert!(backoff <= Duration::from_secs(900));
        }
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::standard();

        assert!(policy.should_retry(3, FailureCause::Network));
        assert!(policy.should_retry(1, FailureCause::Captcha));
        assert!(!policy.should_retry(0, FailureCause::Network));
        assert!(!policy.should_retry(2, FailureCause::Rejected));
    }

    #[test]
    fn test_next_retry_time() {
        use chrono::TimeZone;

        let policy = RetryPolicy {
            max_retries: 1,
            min_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
        };
        let rng = SharedRng::seeded(5);
        let base_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let next_retry = policy.next_retry_time(base_time, &rng);
        assert_eq!(next_retry, base_time + chrono::Duration::seconds(60));
    }
}
