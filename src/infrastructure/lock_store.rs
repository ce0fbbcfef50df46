//! 锁存储接口 - 基础设施层
//!
//! 控制面唯一的进程外共享可变状态。所有"检查再修改"的动作都必须在
//! 存储一侧一次原子完成，接口上不提供 get / set 两步走的组合。

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// 锁存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 存储不可达
    #[error("锁存储连接失败: {0}")]
    ConnectionFailed(String),
    /// 命令执行失败
    #[error("锁存储命令失败: {0}")]
    CommandFailed(String),
}

/// 带 TTL 的共享键值存储
#[async_trait]
pub trait LockStore: Send + Sync {
    /// 仅当 key 不存在时写入 holder，TTL 在同一次操作中生效
    ///
    /// 返回是否写入成功
    async fn set_if_absent(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// 仅当当前值等于 holder 时删除
    ///
    /// 返回是否删除了 key
    async fn compare_and_delete(&self, key: &str, holder: &str) -> Result<bool, StoreError>;

    /// 滑动窗口准入：裁剪过期时间戳、计数、准入后记录，三步原子完成
    ///
    /// `member` 是本次请求的唯一标识
    async fn admit_sliding_window(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
        member: &str,
    ) -> Result<bool, StoreError>;

    /// 列出前缀下所有仍有效的锁及其持有者
    async fn scan_locks(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;
}
