use std::fmt::Display;

use crate::connectors::{Operation, Platform};
use crate::session::Account;

/// 所有锁 key 的公共前缀
pub const LOCK_PREFIX: &str = "lock:";

/// 锁 key：`lock:{source}:{source_id}:{platform}:{operation}`
///
/// 粒度是"账号 + 平台 + 操作"而不是任务：同一账号同一操作在任何任务之间
/// 都是串行的，不同操作可以并行。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    rendered: String,
    operation: Operation,
}

impl LockKey {
    /// 账号在构造时已校验过，平台和操作是封闭枚举，这里不会失败
    pub fn new(account: &Account, platform: Platform, operation: Operation) -> Self {
        Self {
            rendered: format!(
                "{}{}:{}:{}:{}",
                LOCK_PREFIX,
                account.source(),
                account.source_id(),
                platform,
                operation
            ),
            operation,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }
}

impl Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rendered)
    }
}
