//! 混合执行策略 - 流程层
//!
//! 核心职责：定义"一个条目"的执行路径
//!
//! 流程顺序：
//! 1. 快速路径：直接在会话页面上执行 JS（限时，秒级）
//! 2. 快速路径异常或超时 → Agent 路径：AI 读页面后抽取（限时，分钟级）
//! 3. Agent 路径失败 → 条目失败（不影响同批其他条目）
//!
//! 每个结果都带上产生它的路径。

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use tracing::{info, warn};

use super::item_ctx::ItemCtx;
use crate::config::Config;
use crate::connectors::Operation;
use crate::error::{ControlError, ControlResult};

/// 产生结果的路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionPath {
    FastPath,
    AgentPath,
}

/// 带路径的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Served<T> {
    pub value: T,
    pub path: ExecutionPath,
}

/// 执行策略参数
#[derive(Debug, Clone)]
pub struct HybridOptions {
    pub fast_timeout: Duration,
    pub agent_timeout: Duration,
    /// 这些操作直接走 Agent 路径
    pub skip_fast_path_for: HashSet<Operation>,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            fast_timeout: Duration::from_millis(3000),
            agent_timeout: Duration::from_secs(90),
            skip_fast_path_for: HashSet::new(),
        }
    }
}

impl HybridOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fast_timeout: Duration::from_millis(config.fast_path_timeout_ms),
            agent_timeout: Duration::from_secs(config.agent_path_timeout_secs),
            skip_fast_path_for: HashSet::new(),
        }
    }
}

/// 路径统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PathStats {
    pub fast_path: usize,
    pub agent_path: usize,
    pub failed: usize,
}

/// 混合执行器
///
/// 不持有任何资源，多个 worker 共享同一个实例
pub struct HybridExecutor {
    options: HybridOptions,
    fast: AtomicUsize,
    agent: AtomicUsize,
    failed: AtomicUsize,
}

impl HybridExecutor {
    pub fn new(options: HybridOptions) -> Self {
        Self {
            options,
            fast: AtomicUsize::new(0),
            agent: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn options(&self) -> &HybridOptions {
        &self.options
    }

    pub fn stats(&self) -> PathStats {
        PathStats {
            fast_path: self.fast.load(Ordering::Relaxed),
            agent_path: self.agent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// 先快速路径，失败后回退 Agent 路径，两条路径各最多执行一次
    pub async fn execute<T, FastFn, FastFut, AgentFn, AgentFut>(
        &self,
        ctx: &ItemCtx,
        fast: FastFn,
        agent: AgentFn,
    ) -> ControlResult<Served<T>>
    where
        FastFn: FnOnce() -> FastFut,
        FastFut: Future<Output = anyhow::Result<T>>,
        AgentFn: FnOnce() -> AgentFut,
        AgentFut: Future<Output = anyhow::Result<T>>,
    {
        if self.options.skip_fast_path_for.contains(&ctx.operation) {
            info!("{} 跳过快速路径", ctx);
            return self.run_agent(ctx, agent).await;
        }

        let failure = match timeout(self.options.fast_timeout, fast()).await {
            Ok(Ok(value)) => {
                self.fast.fetch_add(1, Ordering::Relaxed);
                info!("{} ⚡ 快速路径成功", ctx);
                return Ok(Served {
                    value,
                    path: ExecutionPath::FastPath,
                });
            }
            Ok(Err(e)) => ControlError::FastPathFailed(format!("{:#}", e)),
            Err(_) => ControlError::FastPathFailed(format!(
                "超过 {:?} 未返回",
                self.options.fast_timeout
            )),
        };

        warn!("{} {}，转 Agent 路径", ctx, failure);
        self.run_agent(ctx, agent).await
    }

    /// 只有 Agent 路径的操作（如发布）
    pub async fn agent_only<T, AgentFn, AgentFut>(&self, ctx: &ItemCtx, agent: AgentFn) -> ControlResult<Served<T>>
    where
        AgentFn: FnOnce() -> AgentFut,
        AgentFut: Future<Output = anyhow::Result<T>>,
    {
        self.run_agent(ctx, agent).await
    }

    async fn run_agent<T, AgentFn, AgentFut>(&self, ctx: &ItemCtx, agent: AgentFn) -> ControlResult<Served<T>>
    where
        AgentFn: FnOnce() -> AgentFut,
        AgentFut: Future<Output = anyhow::Result<T>>,
    {
        let failure = match timeout(self.options.agent_timeout, agent()).await {
            Ok(Ok(value)) => {
                self.agent.fetch_add(1, Ordering::Relaxed);
                info!("{} 🤖 Agent 路径成功", ctx);
                return Ok(Served {
                    value,
                    path: ExecutionPath::AgentPath,
                });
            }
            Ok(Err(e)) => ControlError::AgentPathFailed(format!("{:#}", e)),
            Err(_) => ControlError::AgentPathFailed(format!(
                "超过 {:?} 未返回",
                self.options.agent_timeout
            )),
        };

        self.failed.fetch_add(1, Ordering::Relaxed);
        warn!("{} ❌ {}", ctx, failure);
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::Platform;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicU32;

    fn ctx(operation: Operation) -> ItemCtx {
        ItemCtx::new("t1", Platform::Xiaohongshu, operation, 1, "https://www.xiaohongshu.com/explore/1")
    }

    #[tokio::test]
    async fn test_fast_path_success_skips_agent() {
        let executor = HybridExecutor::new(HybridOptions::default());
        let agent_calls = AtomicU32::new(0);

        let served = executor
            .execute(
                &ctx(Operation::GetDetails),
                || async { Ok("fast") },
                || async {
                    agent_calls.fetch_add(1, Ordering::SeqCst);
                    Ok("agent")
                },
            )
            .await
            .unwrap();

        assert_eq!(served.path, ExecutionPath::FastPath);
        assert_eq!(served.value, "fast");
        assert_eq!(agent_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_path_timeout_falls_back() {
        let executor = HybridExecutor::new(HybridOptions::default());

        let served = executor
            .execute(
                &ctx(Operation::GetDetails),
                || async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(1)
                },
                || async { Ok(2) },
            )
            .await
            .unwrap();

        assert_eq!(served, Served { value: 2, path: ExecutionPath::AgentPath });
        assert_eq!(executor.stats().agent_path, 1);
    }

    #[tokio::test]
    async fn test_agent_failure_is_terminal() {
        let executor = HybridExecutor::new(HybridOptions::default());

        let result: ControlResult<Served<()>> = executor
            .execute(
                &ctx(Operation::GetDetails),
                || async { Err(anyhow!("noteDetailMap 不存在")) },
                || async { Err(anyhow!("页面是验证码")) },
            )
            .await;

        match result {
            Err(ControlError::AgentPathFailed(msg)) => assert!(msg.contains("验证码")),
            other => panic!("应当是 AgentPathFailed: {:?}", other.map(|s| s.path)),
        }
        assert_eq!(executor.stats(), PathStats { fast_path: 0, agent_path: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_skip_list_goes_straight_to_agent() {
        let mut options = HybridOptions::default();
        options.skip_fast_path_for.insert(Operation::SearchAndExtract);
        let executor = HybridExecutor::new(options);
        let fast_calls = AtomicU32::new(0);

        let served = executor
            .execute(
                &ctx(Operation::SearchAndExtract),
                || async {
                    fast_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                },
                || async { Ok(1) },
            )
            .await
            .unwrap();

        assert_eq!(served.path, ExecutionPath::AgentPath);
        assert_eq!(fast_calls.load(Ordering::SeqCst), 0);
    }
}
