//! 控制面入口 - 编排层
//!
//! ## 职责
//!
//! - [`ControlPlane`]：每个进程构造一次，持有锁、限流、会话、连接器、执行策略
//! - [`TaskScope`]：一个任务的生命周期，任务内的所有操作都从这里发起
//!
//! ## 一次操作的流水线
//!
//! ```text
//! 解析平台与能力 → 频率限制 → 加锁（登记到任务）→ 连接器执行 → 解锁
//! ```
//!
//! 任务结束（`finish`）或被丢弃（取消、panic）时，释放任务名下全部锁、
//! 回收仍存活的会话、注销任务。

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{info, warn};

use super::batch_processor::BatchParams;
use crate::connectors::{dispatch, ConnectorRegistry, ItemReport, OperationContext, OperationRequest, Platform};
use crate::coordination::{AdmissionPolicy, LockKey, LockManager, RateLimitTable, RateLimiter};
use crate::error::{ControlError, ControlResult};
use crate::infrastructure::{AutomationProvider, LockStore};
use crate::services::ExtractionAgent;
use crate::session::{Account, SessionRegistry};
use crate::utils::logging::log_final_stats;
use crate::workflow::{HybridExecutor, HybridOptions, PathStats};

/// 未配置频率限制的操作使用的锁 TTL
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(180);

/// 连接器控制面
#[derive(Clone)]
pub struct ControlPlane {
    locks: Arc<LockManager>,
    limiter: RateLimiter,
    sessions: SessionRegistry,
    connectors: Arc<ConnectorRegistry>,
    hybrid: Arc<HybridExecutor>,
    agent: Arc<dyn ExtractionAgent>,
    default_lock_ttl: Duration,
}

impl ControlPlane {
    pub fn new(
        store: Arc<dyn LockStore>,
        rate_limits: RateLimitTable,
        provider: Arc<dyn AutomationProvider>,
        agent: Arc<dyn ExtractionAgent>,
    ) -> Self {
        Self {
            locks: Arc::new(LockManager::new(Arc::clone(&store))),
            limiter: RateLimiter::new(store, rate_limits),
            sessions: SessionRegistry::new(provider),
            connectors: Arc::new(ConnectorRegistry::with_defaults()),
            hybrid: Arc::new(HybridExecutor::new(HybridOptions::default())),
            agent,
            default_lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn with_connectors(mut self, connectors: ConnectorRegistry) -> Self {
        self.connectors = Arc::new(connectors);
        self
    }

    pub fn with_hybrid_options(mut self, options: HybridOptions) -> Self {
        self.hybrid = Arc::new(HybridExecutor::new(options));
        self
    }

    pub fn with_default_lock_ttl(mut self, ttl: Duration) -> Self {
        self.default_lock_ttl = ttl;
        self
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn path_stats(&self) -> PathStats {
        self.hybrid.stats()
    }

    /// 启动时清理残留锁
    pub async fn sweep_orphans(&self) -> ControlResult<usize> {
        self.locks.sweep_orphans().await
    }

    /// 开始一个任务
    pub fn begin_task(&self, task_id: impl Into<String>, account: Account) -> ControlResult<TaskScope> {
        let task_id = task_id.into();
        if task_id.is_empty() {
            return Err(ControlError::InvalidIdentifier {
                field: "task_id",
                value: task_id,
            });
        }
        if !self.locks.register_task(&task_id) {
            return Err(ControlError::Config(format!("任务 {} 已在运行", task_id)));
        }

        info!(task_id = %task_id, account = %account, "🚀 任务开始");
        Ok(TaskScope {
            task_id,
            account,
            plane: self.clone(),
            finished: false,
        })
    }

    /// 任务收尾：释放锁、回收会话、注销任务
    async fn cleanup_task(&self, task_id: &str) -> ControlResult<()> {
        let mut released = self.locks.release_all(task_id).await;
        if released.is_err() {
            // 失败的锁仍在任务名下，注销前再试一次
            released = self.locks.release_all(task_id).await;
        }
        let sessions = self.sessions.teardown_task(task_id).await;
        let leftover = self.locks.unregister_task(task_id);
        if !leftover.is_empty() {
            warn!(task_id = %task_id, ?leftover, "[锁] 以下锁未能释放，等待 TTL 过期");
        }

        match &released {
            Ok(locks) => info!(task_id = %task_id, locks, sessions, "🏁 任务结束，资源已回收"),
            Err(e) => warn!(task_id = %task_id, sessions, "任务结束，部分锁未能释放: {}", e),
        }
        released.map(|_| ())
    }
}

/// 一个任务的作用域
pub struct TaskScope {
    task_id: String,
    account: Account,
    plane: ControlPlane,
    finished: bool,
}

impl TaskScope {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// 执行一次操作
    ///
    /// 被限流返回 `RateLimitExceeded`，锁被占用返回 `LockNotGranted`，
    /// 两者都属于"稍后再试"；是否先退避重试由 `admission` 决定。
    /// 条目级失败不会让整个操作失败，而是出现在对应条目的结果里。
    pub async fn run(
        &self,
        platform: Platform,
        request: OperationRequest,
        batch: BatchParams,
        admission: AdmissionPolicy,
    ) -> ControlResult<Vec<ItemReport>> {
        let plane = &self.plane;
        let operation = request.operation();

        let connector = plane.connectors.resolve(platform)?;
        if !connector.supports(operation) {
            return Err(ControlError::unsupported(platform, operation));
        }

        // 1. 频率限制
        let admitted = admission
            .on_rate_limited
            .run(|| async {
                let ok = plane
                    .limiter
                    .try_admit_for(&self.account, platform, operation)
                    .await?;
                Ok(ok.then_some(()))
            })
            .await?;
        if admitted.is_none() {
            return Err(ControlError::RateLimitExceeded { platform, operation });
        }

        // 2. 加锁
        let key = LockKey::new(&self.account, platform, operation);
        let ttl = plane
            .limiter
            .table()
            .lock_ttl(platform, operation, plane.default_lock_ttl);
        let guard = admission
            .on_lock_contended
            .run(|| plane.locks.acquire_guarded(&key, ttl, &self.task_id))
            .await?
            .ok_or_else(|| ControlError::LockNotGranted {
                key: key.to_string(),
                operation,
            })?;

        // 3. 执行
        let ctx = OperationContext {
            task_id: self.task_id.clone(),
            account: self.account.clone(),
            platform,
            sessions: plane.sessions.clone(),
            hybrid: Arc::clone(&plane.hybrid),
            agent: Arc::clone(&plane.agent),
            batch,
        };
        let result = dispatch(connector.as_ref(), &ctx, request).await;

        // 4. 解锁
        if let Err(e) = guard.release().await {
            warn!(task_id = %self.task_id, key = %key, "[锁] 解锁失败，等待 TTL 过期: {}", e);
        }

        if let Ok(reports) = &result {
            let success = reports.iter().filter(|r| r.success).count();
            log_final_stats(&format!("{}/{}", platform, operation), success, reports.len());
        }
        result
    }

    /// 结束任务
    pub async fn finish(mut self) -> ControlResult<()> {
        self.finished = true;
        self.plane.cleanup_task(&self.task_id).await
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let plane = self.plane.clone();
        let task_id = std::mem::take(&mut self.task_id);
        warn!(task_id = %task_id, "任务未正常结束，后台回收资源");

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = plane.cleanup_task(&task_id).await;
                });
            }
            Err(_) => warn!(task_id = %task_id, "运行时已关闭，锁将在 TTL 到期后释放"),
        }
    }
}
