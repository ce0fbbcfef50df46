//! 频率限制 - 协调层
//!
//! ## 职责
//!
//! - 按 (平台, 操作) 查表得到 `{max_requests, window, lock_timeout}`
//! - 滑动窗口计数：裁剪、计数、记录在锁存储一侧原子完成
//! - 拒绝是软拒绝（返回 `false`），由调用方转成"稍后再试"
//!
//! 未出现在表里的 (平台, 操作) 不限流。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::connectors::{Operation, Platform};
use crate::error::{ControlError, ControlResult};
use crate::infrastructure::LockStore;
use crate::session::Account;

/// 单个操作的频率策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RatePolicy {
    pub max_requests: u32,
    pub window_seconds: u64,
    pub lock_timeout_seconds: u64,
}

impl RatePolicy {
    pub const fn new(max_requests: u32, window_seconds: u64, lock_timeout_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
            lock_timeout_seconds,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }
}

/// 频率限制表：平台 → 操作 → 策略
#[derive(Debug, Clone, Default)]
pub struct RateLimitTable {
    policies: HashMap<Platform, HashMap<Operation, RatePolicy>>,
}

impl RateLimitTable {
    /// 空表，所有操作都不限流
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// 内置表
    pub fn builtin() -> Self {
        let account_ops = [
            (Operation::Login, RatePolicy::new(3, 60, 120)),
            (Operation::GetDetails, RatePolicy::new(10, 60, 180)),
            (Operation::HarvestUserContent, RatePolicy::new(5, 60, 300)),
        ];
        let feed_ops = [
            (Operation::SearchAndExtract, RatePolicy::new(10, 60, 180)),
            (Operation::Publish, RatePolicy::new(2, 60, 300)),
        ];

        let mut table = Self::default();
        for (op, policy) in account_ops.iter().chain(feed_ops.iter()) {
            table.insert(Platform::Xiaohongshu, *op, *policy);
        }
        for (op, policy) in account_ops {
            table.insert(Platform::Wechat, op, policy);
        }
        table
    }

    /// 解析 TOML 格式的表
    ///
    /// ```toml
    /// [xiaohongshu.get_details]
    /// max_requests = 10
    /// window_seconds = 60
    /// lock_timeout_seconds = 180
    /// ```
    pub fn from_toml_str(content: &str) -> ControlResult<Self> {
        let raw: HashMap<String, HashMap<String, RatePolicy>> = toml::from_str(content)
            .map_err(|e| ControlError::Config(format!("频率限制表解析失败: {}", e)))?;

        let mut table = Self::default();
        for (platform, ops) in raw {
            let platform: Platform = platform.parse()?;
            for (op, policy) in ops {
                let op: Operation = op.parse()?;
                if policy.max_requests == 0 || policy.window_seconds == 0 {
                    return Err(ControlError::Config(format!(
                        "{}/{} 的 max_requests 与 window_seconds 必须大于 0",
                        platform, op
                    )));
                }
                table.insert(platform, op, policy);
            }
        }
        Ok(table)
    }

    /// 从文件加载
    pub async fn load(path: &Path) -> ControlResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ControlError::Config(format!("无法读取频率限制表 {}: {}", path.display(), e))
        })?;
        let table = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "[限流] 已加载频率限制表");
        Ok(table)
    }

    pub fn insert(&mut self, platform: Platform, operation: Operation, policy: RatePolicy) {
        self.policies
            .entry(platform)
            .or_default()
            .insert(operation, policy);
    }

    pub fn policy(&self, platform: Platform, operation: Operation) -> Option<&RatePolicy> {
        self.policies.get(&platform)?.get(&operation)
    }

    /// 操作对应的锁 TTL，未配置时用 `default`
    pub fn lock_ttl(&self, platform: Platform, operation: Operation, default: Duration) -> Duration {
        self.policy(platform, operation)
            .map(RatePolicy::lock_timeout)
            .unwrap_or(default)
    }
}

/// 频率限制器
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn LockStore>,
    table: Arc<RateLimitTable>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn LockStore>, table: RateLimitTable) -> Self {
        Self {
            store,
            table: Arc::new(table),
        }
    }

    pub fn table(&self) -> &RateLimitTable {
        &self.table
    }

    /// 全局窗口准入：同一 (平台, 操作) 的所有账号共用一个窗口
    pub async fn try_admit(&self, platform: Platform, operation: Operation) -> ControlResult<bool> {
        let key = format!("rate_limit:{}:{}", platform, operation);
        self.admit(&key, platform, operation).await
    }

    /// 按账号准入：每个账号单独计数
    pub async fn try_admit_for(
        &self,
        account: &Account,
        platform: Platform,
        operation: Operation,
    ) -> ControlResult<bool> {
        let key = format!(
            "rate_limit:{}:{}:{}:{}",
            account.source(),
            account.source_id(),
            platform,
            operation
        );
        self.admit(&key, platform, operation).await
    }

    async fn admit(&self, key: &str, platform: Platform, operation: Operation) -> ControlResult<bool> {
        let Some(policy) = self.table.policy(platform, operation) else {
            return Ok(true);
        };

        // 每次请求一个唯一成员，同一毫秒内的多次请求不会互相覆盖
        let member = uuid::Uuid::new_v4().to_string();
        let admitted = self
            .store
            .admit_sliding_window(key, policy.window(), policy.max_requests, &member)
            .await
            .map_err(|e| {
                warn!(key = %key, "[限流] 锁存储不可用，拒绝请求: {}", e);
                ControlError::LockUnavailable(e.to_string())
            })?;

        if admitted {
            debug!(key = %key, "[限流] 放行");
        } else {
            warn!(
                key = %key,
                max_requests = policy.max_requests,
                window_secs = policy.window_seconds,
                "[限流] ⏳ 超出频率限制"
            );
        }
        Ok(admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MemoryLockStore;

    #[test]
    fn test_builtin_table() {
        let table = RateLimitTable::builtin();
        assert_eq!(
            table.policy(Platform::Xiaohongshu, Operation::Publish),
            Some(&RatePolicy::new(2, 60, 300))
        );
        assert!(table.policy(Platform::Wechat, Operation::Publish).is_none());
        assert!(table.policy(Platform::Generic, Operation::GetDetails).is_none());
        assert_eq!(
            table.lock_ttl(Platform::Generic, Operation::GetDetails, Duration::from_secs(180)),
            Duration::from_secs(180)
        );
    }

    #[test]
    fn test_parse_toml_table() {
        let table = RateLimitTable::from_toml_str(
            r#"
            [wechat.get_details]
            max_requests = 4
            window_seconds = 30
            lock_timeout_seconds = 90
            "#,
        )
        .unwrap();
        let policy = table.policy(Platform::Wechat, Operation::GetDetails).unwrap();
        assert_eq!(policy.window(), Duration::from_secs(30));
        assert_eq!(policy.lock_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_rejects_unknown_names() {
        let bad = r#"
            [tiktok.login]
            max_requests = 1
            window_seconds = 1
            lock_timeout_seconds = 1
        "#;
        assert!(matches!(
            RateLimitTable::from_toml_str(bad),
            Err(ControlError::UnknownPlatform(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_operation_is_unlimited() {
        let limiter = RateLimiter::new(Arc::new(MemoryLockStore::new()), RateLimitTable::unlimited());
        for _ in 0..100 {
            assert!(limiter.try_admit(Platform::Generic, Operation::GetDetails).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_accounts_have_separate_windows() {
        let mut table = RateLimitTable::unlimited();
        table.insert(Platform::Xiaohongshu, Operation::Login, RatePolicy::new(1, 60, 120));
        let limiter = RateLimiter::new(Arc::new(MemoryLockStore::new()), table);

        let a = Account::new("crm", "a").unwrap();
        let b = Account::new("crm", "b").unwrap();
        assert!(limiter.try_admit_for(&a, Platform::Xiaohongshu, Operation::Login).await.unwrap());
        assert!(!limiter.try_admit_for(&a, Platform::Xiaohongshu, Operation::Login).await.unwrap());
        assert!(limiter.try_admit_for(&b, Platform::Xiaohongshu, Operation::Login).await.unwrap());
    }
}
