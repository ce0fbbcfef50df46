//! 协调层（Coordination）
//!
//! ## 职责
//!
//! 在多个并发任务之间协调对同一账号的访问，唯一的共享介质是锁存储。
//!
//! ## 模块划分
//!
//! - `lock_key` - 锁 key 的格式
//! - `lock_manager` - 加锁 / 解锁 / 任务锁登记表 / 残留锁清理
//! - `rate_limiter` - 滑动窗口频率限制
//! - `admission` - 被拒绝时立即失败还是退避重试
//!
//! 请求先过频率限制，再加锁。

pub mod admission;
pub mod lock_key;
pub mod lock_manager;
pub mod rate_limiter;

pub use admission::{AdmissionPolicy, RetryPolicy};
pub use lock_key::{LockKey, LOCK_PREFIX};
pub use lock_manager::{LockGuard, LockManager, TaskLockRegistry};
pub use rate_limiter::{RateLimitTable, RateLimiter, RatePolicy};
