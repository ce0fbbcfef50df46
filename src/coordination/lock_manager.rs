//! 分布式锁管理器 - 协调层
//!
//! ## 职责
//!
//! - 以"账号 + 平台 + 操作"为粒度加锁、解锁，TTL 随加锁原子生效
//! - 维护任务锁登记表（任务 → 持有的锁 key），任务结束时一次性释放
//! - 启动时清理不属于任何活跃任务的残留锁
//!
//! ## 约定
//!
//! - 加锁是非阻塞尝试，拿不到返回 `false`，要不要等由调用方决定
//! - 解锁只删除自己持有的锁（比较持有者后删除，存储侧原子完成）
//! - 存储不可达时加锁失败即拒绝，返回 `LockUnavailable`，从不放行
//! - 锁不会自动续期，只能在旧锁消失后重新获取

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::lock_key::{LockKey, LOCK_PREFIX};
use crate::error::{ControlError, ControlResult};
use crate::infrastructure::{LockStore, StoreError};

fn unavailable(e: StoreError) -> ControlError {
    ControlError::LockUnavailable(e.to_string())
}

/// 任务锁登记表
///
/// 每个控制面实例一份，由 [`LockManager`] 持有。任务在登记表里即视为活跃，
/// 登记表为空时进程内没有任何任务持锁。
#[derive(Default)]
pub struct TaskLockRegistry {
    tasks: Mutex<HashMap<String, HashSet<String>>>,
}

impl TaskLockRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashSet<String>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 登记活跃任务，已存在时返回 false
    pub fn register_task(&self, task_id: &str) -> bool {
        let mut tasks = self.lock();
        if tasks.contains_key(task_id) {
            return false;
        }
        tasks.insert(task_id.to_string(), HashSet::new());
        true
    }

    /// 注销任务，返回注销时仍登记在它名下的锁
    pub fn unregister_task(&self, task_id: &str) -> Vec<String> {
        self.lock()
            .remove(task_id)
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.lock().contains_key(task_id)
    }

    pub fn active_tasks(&self) -> HashSet<String> {
        self.lock().keys().cloned().collect()
    }

    /// 任务当前持有的锁
    pub fn held_by(&self, task_id: &str) -> Vec<String> {
        self.lock()
            .get(task_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn record(&self, task_id: &str, key: &str) {
        self.lock()
            .entry(task_id.to_string())
            .or_default()
            .insert(key.to_string());
    }

    fn forget(&self, task_id: &str, key: &str) {
        if let Some(keys) = self.lock().get_mut(task_id) {
            keys.remove(key);
        }
    }
}

/// 分布式锁管理器
pub struct LockManager {
    store: Arc<dyn LockStore>,
    registry: TaskLockRegistry,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            registry: TaskLockRegistry::default(),
        }
    }

    pub fn registry(&self) -> &TaskLockRegistry {
        &self.registry
    }

    pub fn register_task(&self, task_id: &str) -> bool {
        self.registry.register_task(task_id)
    }

    pub fn unregister_task(&self, task_id: &str) -> Vec<String> {
        self.registry.unregister_task(task_id)
    }

    pub fn is_task_active(&self, task_id: &str) -> bool {
        self.registry.is_active(task_id)
    }

    /// 尝试加锁
    ///
    /// 只有 key 不存在时才写入，TTL 在同一次操作中设置。
    /// 被占用返回 `Ok(false)`；存储不可达返回 `LockUnavailable`。
    pub async fn acquire(&self, key: &LockKey, ttl: Duration, holder: &str) -> ControlResult<bool> {
        let granted = self
            .store
            .set_if_absent(key.as_str(), holder, ttl)
            .await
            .map_err(|e| {
                warn!(key = %key, holder = %holder, "[锁] 锁存储不可用，拒绝加锁: {}", e);
                unavailable(e)
            })?;

        if granted {
            debug!(key = %key, holder = %holder, ttl_secs = ttl.as_secs(), "[锁] 🔒 加锁成功");
        } else {
            debug!(key = %key, holder = %holder, "[锁] 锁已被占用");
        }
        Ok(granted)
    }

    /// 解锁
    ///
    /// 当前持有者与 `holder` 不一致时什么都不做，返回 `Ok(false)`
    pub async fn release(&self, key: &LockKey, holder: &str) -> ControlResult<bool> {
        self.release_raw(key.as_str(), holder).await
    }

    /// 存储确认之后才从登记表移除，失败或被取消时 key 仍留在任务名下
    async fn release_raw(&self, key: &str, holder: &str) -> ControlResult<bool> {
        let released = self
            .store
            .compare_and_delete(key, holder)
            .await
            .map_err(unavailable)?;
        self.registry.forget(holder, key);

        if released {
            debug!(key = %key, holder = %holder, "[锁] 🔓 解锁成功");
        } else {
            debug!(key = %key, holder = %holder, "[锁] 锁不属于该持有者或已过期，跳过");
        }
        Ok(released)
    }

    /// 把锁登记到任务名下
    pub fn register_holder(&self, task_id: &str, key: &LockKey) {
        self.registry.record(task_id, key.as_str());
    }

    /// 释放任务名下的全部锁，不管剩余 TTL
    ///
    /// 逐个尝试，单个失败不影响其余；有失败时在全部尝试后返回错误，
    /// 失败的锁留在任务名下，可以再次调用。
    pub async fn release_all(&self, task_id: &str) -> ControlResult<usize> {
        let keys = self.registry.held_by(task_id);
        if keys.is_empty() {
            return Ok(0);
        }

        let mut released = 0;
        let mut last_error = None;
        for key in &keys {
            match self.store.compare_and_delete(key, task_id).await {
                Ok(deleted) => {
                    self.registry.forget(task_id, key);
                    if deleted {
                        released += 1;
                    } else {
                        debug!(key = %key, task_id = %task_id, "[锁] 锁已过期或被接管");
                    }
                }
                Err(e) => {
                    warn!(key = %key, task_id = %task_id, "[锁] 释放失败，保留在任务名下: {}", e);
                    last_error = Some(e);
                }
            }
        }

        info!(task_id = %task_id, released, total = keys.len(), "[锁] 已释放任务持有的锁");

        match last_error {
            Some(e) => Err(unavailable(e)),
            None => Ok(released),
        }
    }

    /// 加锁并登记到任务名下，成功时返回守卫
    pub async fn acquire_guarded(
        self: &Arc<Self>,
        key: &LockKey,
        ttl: Duration,
        task_id: &str,
    ) -> ControlResult<Option<LockGuard>> {
        if !self.acquire(key, ttl, task_id).await? {
            return Ok(None);
        }
        self.register_holder(task_id, key);
        Ok(Some(LockGuard {
            manager: Arc::clone(self),
            key: key.clone(),
            holder: task_id.to_string(),
            released: false,
        }))
    }

    /// 在锁保护下执行一个操作
    ///
    /// 拿不到锁返回 `LockNotGranted`。操作成功、失败或被取消都会解锁。
    pub async fn with_lock<T, Fut>(
        self: &Arc<Self>,
        key: &LockKey,
        ttl: Duration,
        task_id: &str,
        operation: Fut,
    ) -> ControlResult<T>
    where
        Fut: Future<Output = ControlResult<T>>,
    {
        let guard = self
            .acquire_guarded(key, ttl, task_id)
            .await?
            .ok_or_else(|| ControlError::LockNotGranted {
                key: key.to_string(),
                operation: key.operation(),
            })?;

        let output = operation.await;
        if let Err(e) = guard.release().await {
            warn!(key = %key, "[锁] 操作结束后解锁失败: {}", e);
        }
        output
    }

    /// 清理残留锁
    ///
    /// 删除所有持有者不是本进程活跃任务的锁。只适用于单实例部署：
    /// 多实例时其他实例的任务也会被当成残留。
    pub async fn sweep_orphans(&self) -> ControlResult<usize> {
        let active = self.registry.active_tasks();
        let locks = self.store.scan_locks(LOCK_PREFIX).await.map_err(unavailable)?;

        let mut removed = 0;
        for (key, holder) in locks {
            if active.contains(&holder) {
                continue;
            }
            if self
                .store
                .compare_and_delete(&key, &holder)
                .await
                .map_err(unavailable)?
            {
                info!(key = %key, holder = %holder, "[锁] 🧹 清理残留锁");
                removed += 1;
            }
        }

        info!(removed, "[锁] 残留锁清理完成");
        Ok(removed)
    }
}

/// 锁守卫
///
/// 显式调用 [`LockGuard::release`] 解锁；没走到那一步就被丢弃时（任务被取消、
/// panic），在后台补一次解锁。两条路径合起来只执行一次。
pub struct LockGuard {
    manager: Arc<LockManager>,
    key: LockKey,
    holder: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// 解锁失败或被取消时守卫仍未释放，丢弃时会在后台再试一次
    pub async fn release(mut self) -> ControlResult<bool> {
        let released = self.manager.release(&self.key, &self.holder).await?;
        self.released = true;
        Ok(released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let manager = Arc::clone(&self.manager);
        let key = self.key.clone();
        let holder = std::mem::take(&mut self.holder);

        match Handle::try_current() {
            Ok(handle) => {
                debug!(key = %key, "[锁] 守卫被丢弃，后台解锁");
                handle.spawn(async move {
                    if let Err(e) = manager.release(&key, &holder).await {
                        warn!(key = %key, "[锁] 后台解锁失败，等待 TTL 过期: {}", e);
                    }
                });
            }
            Err(_) => warn!(key = %key, "[锁] 运行时已关闭，锁将在 TTL 到期后释放"),
        }
    }
}
