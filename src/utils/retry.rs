use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;
use crate::core::{Result, UploadError};

/// 重试策略
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// 固定延迟
    Fixed(Duration),
    /// 指数退避
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// 第 `attempt` 次（从 0 开始）失败后的等待时间
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let exponent = attempt.min(i32::MAX as u32) as i32;
                let delay = initial.as_secs_f64() * multiplier.powi(exponent);
                // 溢出或非有限值时取上限
                Duration::try_from_secs_f64(delay).map_or(*max_delay, |d| d.min(*max_delay))
            }
        }
    }
}

/// 重试配置
pub struct RetryConfig {
    /// 最大尝试次数（含第一次）
    pub max_attempts: u32,
    /// 重试策略
    pub strategy: RetryStrategy,
    /// 是否重试的判断函数
    pub should_retry: Box<dyn Fn(&UploadError) -> bool + Send + Sync>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential {
                initial: Duration::from_secs(1),
                multiplier: 2.0,
                max_delay: Duration::from_secs(60),
            },
            should_retry: Box::new(|_| true),
        }
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// 执行带重试的操作
///
/// On failure returns the number of attempts made together with the last error.
pub async fn retry_counted<F, Fut, T>(
    config: &RetryConfig,
    mut operation: F,
) -> std::result::Result<T, (u32, UploadError)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                attempt += 1;

                // 检查是否应该重试
                if attempt >= max_attempts || !(config.should_retry)(&error) {
                    return Err((attempt, error));
                }

                let delay = config.strategy.get_delay(attempt - 1);
                warn!(attempt, ?delay, %error, "attempt failed, retrying");
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn exponential_delays_double() {
        let strategy = RetryConfig::default().strategy;
        assert_eq!(strategy.get_delay(0), Duration::from_secs(1));
        assert_eq!(strategy.get_delay(1), Duration::from_secs(2));
        assert_eq!(strategy.get_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn huge_attempt_counts_stay_at_max_delay() {
        let strategy = RetryStrategy::Exponential {
            initial: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(60),
        };
        assert_eq!(strategy.get_delay(80), Duration::from_millis(60));
        assert_eq!(strategy.get_delay(2000), Duration::from_millis(60));
        assert_eq!(strategy.get_delay(u32::MAX), Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success() {
        let start = Instant::now();
        let mut count = 0;
        let result = retry_counted(&RetryConfig::default(), || {
            count += 1;
            let current = count;
            async move {
                if current < 3 {
                    Err(UploadError::Network("connection reset".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(count, 3);
        // 1s + 2s
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failure() {
        let mut count = 0;
        let result = retry_counted(&RetryConfig::default(), || {
            count += 1;
            async { Err::<(), _>(UploadError::Network("timeout".to_string())) }
        })
        .await;

        let (attempts, error) = result.unwrap_err();
        assert_eq!(attempts, 3);
        assert_eq!(count, 3); // 默认最大尝试次数
        assert_eq!(error.to_string(), "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_stops_early() {
        let config = RetryConfig {
            should_retry: Box::new(|e| !matches!(e, UploadError::Validation(_))),
            ..RetryConfig::default()
        };
        let mut count = 0;
        let result = retry_counted(&config, || {
            count += 1;
            async { Err::<(), _>(UploadError::Validation("bad".to_string())) }
        })
        .await;

        assert_eq!(result.unwrap_err().0, 1);
        assert_eq!(count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_strategy_waits_constant_delay() {
        let config = RetryConfig {
            max_attempts: 4,
            strategy: RetryStrategy::Fixed(Duration::from_millis(250)),
            ..RetryConfig::default()
        };
        let start = Instant::now();
        let result = retry_counted(&config, || async {
            Err::<(), _>(UploadError::Network("timeout".to_string()))
        })
        .await;

        assert_eq!(result.unwrap_err().0, 4);
        assert_eq!(start.elapsed(), Duration::from_millis(750));
    }
}
