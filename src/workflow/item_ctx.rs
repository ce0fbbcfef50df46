//! 条目处理上下文
//!
//! 封装"哪个任务、哪个平台操作、第几个条目"这一信息，只用于日志

use std::fmt::Display;

use crate::connectors::{Operation, Platform};

/// 条目处理上下文
#[derive(Debug, Clone)]
pub struct ItemCtx {
    /// 任务ID
    pub task_id: String,

    pub platform: Platform,

    pub operation: Operation,

    /// 条目在本次操作中的序号（从1开始）
    pub index: usize,

    /// 条目标识（URL、关键词、创作者 ID）
    pub key: String,
}

impl ItemCtx {
    pub fn new(
        task_id: impl Into<String>,
        platform: Platform,
        operation: Operation,
        index: usize,
        key: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            platform,
            operation,
            index,
            key: key.into(),
        }
    }
}

impl Display for ItemCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[任务 {} {}/{} 条目#{}]",
            self.task_id, self.platform, self.operation, self.index
        )
    }
}
