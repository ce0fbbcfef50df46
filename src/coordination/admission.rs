//! 准入策略
//!
//! 被限流和锁被占用时是立即失败还是退避重试，由调用方按操作指定。

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::ControlResult;

/// 单类拒绝的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// 第一次被拒绝就返回
    #[default]
    FailFast,
    /// 最多尝试 `attempts` 次（含第一次），每次之间等待 `backoff`
    Retry { attempts: u32, backoff: Duration },
}

impl RetryPolicy {
    pub fn retry(attempts: u32, backoff: Duration) -> Self {
        RetryPolicy::Retry { attempts, backoff }
    }

    fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::FailFast => 1,
            RetryPolicy::Retry { attempts, .. } => (*attempts).max(1),
        }
    }

    /// 反复执行 `attempt` 直到拿到结果或次数用尽
    ///
    /// `attempt` 返回 `Ok(None)` 表示本次被拒绝。错误（如存储不可达）立即返回，
    /// 不参与重试。
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> ControlResult<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ControlResult<Option<T>>>,
    {
        let max_attempts = self.max_attempts();
        for n in 1..=max_attempts {
            if let Some(value) = attempt().await? {
                return Ok(Some(value));
            }
            if n < max_attempts {
                if let RetryPolicy::Retry { backoff, .. } = self {
                    debug!(attempt = n, max_attempts, "被拒绝，{:?} 后重试", backoff);
                    tokio::time::sleep(*backoff).await;
                }
            }
        }
        Ok(None)
    }
}

/// 准入策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdmissionPolicy {
    pub on_rate_limited: RetryPolicy,
    pub on_lock_contended: RetryPolicy,
}

impl AdmissionPolicy {
    /// 两类拒绝都立即返回
    pub fn fail_fast() -> Self {
        Self::default()
    }

    /// 两类拒绝都退避重试
    pub fn patient(attempts: u32, backoff: Duration) -> Self {
        Self {
            on_rate_limited: RetryPolicy::retry(attempts, backoff),
            on_lock_contended: RetryPolicy::retry(attempts, backoff),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControlError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_fail_fast_tries_once() {
        let calls = AtomicU32::new(0);
        let out: Option<()> = RetryPolicy::FailFast
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_granted() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::retry(5, Duration::from_secs(2));
        let start = tokio::time::Instant::now();

        let out = policy
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok((n == 3).then_some(n))
            })
            .await
            .unwrap();

        assert_eq!(out, Some(3));
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: ControlResult<Option<()>> = RetryPolicy::retry(5, Duration::from_millis(1))
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ControlError::LockUnavailable("connection refused".into()))
            })
            .await;
        assert!(matches!(result, Err(ControlError::LockUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
