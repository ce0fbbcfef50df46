//! 控制面错误类型
//!
//! 所有对外暴露的操作都返回 [`ControlError`]。叶子层 I/O（CDP 执行、
//! 服务商 HTTP、LLM 调用）内部使用 `anyhow`，在控制面边界统一转换。

use thiserror::Error;

use crate::connectors::{Operation, Platform};

/// 控制面错误
#[derive(Debug, Error)]
pub enum ControlError {
    /// 锁存储不可达（失败即拒绝，从不放行）
    #[error("锁存储不可用: {0}")]
    LockUnavailable(String),

    /// 锁已被其他持有者占用
    #[error("操作 {operation} 正在进行中 (锁 {key} 已被占用)")]
    LockNotGranted { key: String, operation: Operation },

    /// 频率限制，调用方应稍后重试
    #[error("频率限制: {platform}/{operation} 操作过于频繁，请稍后再试")]
    RateLimitExceeded {
        platform: Platform,
        operation: Operation,
    },

    /// 服务商不可用或配额耗尽
    #[error("创建浏览器会话失败: {0}")]
    SessionCreate(String),

    /// 登录态不存在
    #[error("登录态 {0} 不存在，请先登录")]
    ContextNotFound(String),

    /// 快速路径失败（可恢复，触发回退）
    #[error("快速路径失败: {0}")]
    FastPathFailed(String),

    /// Agent 路径失败（该条目终止）
    #[error("Agent 路径失败: {0}")]
    AgentPathFailed(String),

    /// 平台未实现该操作
    #[error("平台 {platform} 不支持操作 {operation}")]
    UnsupportedOperation {
        platform: Platform,
        operation: Operation,
    },

    /// 平台未注册
    #[error("未注册的平台: {0}")]
    UnknownPlatform(String),

    /// 标识不合法（为空或包含冒号）
    #[error("无效的标识 {field}: '{value}'")]
    InvalidIdentifier { field: &'static str, value: String },

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 单个条目的 worker 崩溃或被取消
    #[error("条目执行中断: {0}")]
    Worker(String),

    /// 其他错误（包装叶子层 anyhow 错误）
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ControlError {
    /// 稳定的错误类别，供上层响应体使用
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::LockUnavailable(_) => "lock_unavailable",
            ControlError::LockNotGranted { .. } => "operation_in_progress",
            ControlError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ControlError::SessionCreate(_) => "session_creation_failed",
            ControlError::ContextNotFound(_) => "context_not_found",
            ControlError::FastPathFailed(_) => "fast_path_failed",
            ControlError::AgentPathFailed(_) => "agent_path_failed",
            ControlError::UnsupportedOperation { .. } => "unsupported_operation",
            ControlError::UnknownPlatform(_) => "unknown_platform",
            ControlError::InvalidIdentifier { .. } => "invalid_identifier",
            ControlError::Config(_) => "config_error",
            ControlError::Worker(_) => "worker_failed",
            ControlError::Other(_) => "internal_error",
        }
    }

    /// 是否属于"稍后再试"类的软拒绝
    pub fn is_retry_later(&self) -> bool {
        matches!(
            self,
            ControlError::RateLimitExceeded { .. } | ControlError::LockNotGranted { .. }
        )
    }

    pub fn unsupported(platform: Platform, operation: Operation) -> Self {
        ControlError::UnsupportedOperation {
            platform,
            operation,
        }
    }
}

/// 控制面结果类型
pub type ControlResult<T> = Result<T, ControlError>;
