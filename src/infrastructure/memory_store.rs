//! 内存锁存储
//!
//! 与 Redis 实现遵守同一份原子性约定，所有操作在同一把互斥锁内完成。
//! 时间取自 tokio 时钟，测试中可以 `pause` / `advance`。
//! 只能协调同一进程内的任务，用于单机运行和测试。

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::lock_store::{LockStore, StoreError};

struct LockEntry {
    holder: String,
    expires_at: Instant,
}

struct Window {
    span: Duration,
    stamps: VecDeque<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.stamps.front() {
            if now.duration_since(*oldest) >= self.span {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Default)]
struct State {
    locks: HashMap<String, LockEntry>,
    windows: HashMap<String, Window>,
}

impl State {
    /// 清掉已过期的锁和已空的窗口，map 大小只随仍在生效的 key 增长
    fn purge_expired(&mut self, now: Instant) {
        self.locks.retain(|_, entry| entry.expires_at > now);
        self.windows.retain(|_, window| {
            window.prune(now);
            !window.stamps.is_empty()
        });
    }
}

/// 内存锁存储
#[derive(Default)]
pub struct MemoryLockStore {
    state: Mutex<State>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::CommandFailed(format!("内存存储状态损坏: {}", e)))
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut state = self.lock_state()?;
        state.purge_expired(now);

        if state.locks.contains_key(key) {
            return Ok(false);
        }

        state.locks.insert(
            key.to_string(),
            LockEntry {
                holder: holder.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, holder: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut state = self.lock_state()?;

        let matches = match state.locks.get(key) {
            Some(entry) => entry.expires_at > now && entry.holder == holder,
            None => false,
        };
        if matches {
            state.locks.remove(key);
        }
        Ok(matches)
    }

    async fn admit_sliding_window(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
        _member: &str,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut state = self.lock_state()?;
        state.purge_expired(now);

        let entry = state.windows.entry(key.to_string()).or_insert_with(|| Window {
            span: window,
            stamps: VecDeque::new(),
        });
        entry.span = window;
        entry.prune(now);

        if entry.stamps.len() < max_requests as usize {
            entry.stamps.push_back(now);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn scan_locks(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let now = Instant::now();
        let state = self.lock_state()?;
        Ok(state
            .locks
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.expires_at > now)
            .map(|(key, entry)| (key.clone(), entry.holder.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_is_replaced() {
        let store = MemoryLockStore::new();
        assert!(store.set_if_absent("lock:a", "t1", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent("lock:a", "t2", Duration::from_secs(5)).await.unwrap());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.set_if_absent("lock:a", "t2", Duration::from_secs(5)).await.unwrap());
        assert!(!store.compare_and_delete("lock:a", "t1").await.unwrap());
        assert!(store.compare_and_delete("lock:a", "t2").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_purged() {
        let store = MemoryLockStore::new();
        for n in 0..20 {
            let account = format!("u{}", n);
            store
                .set_if_absent(&format!("lock:crm:{}", account), "t1", Duration::from_secs(5))
                .await
                .unwrap();
            store
                .admit_sliding_window(&format!("rate_limit:crm:{}", account), Duration::from_secs(60), 3, "m")
                .await
                .unwrap();
        }
        assert_eq!(store.lock_state().unwrap().locks.len(), 20);
        assert_eq!(store.lock_state().unwrap().windows.len(), 20);

        tokio::time::advance(Duration::from_secs(61)).await;
        store.set_if_absent("lock:crm:fresh", "t2", Duration::from_secs(5)).await.unwrap();

        let state = store.lock_state().unwrap();
        assert_eq!(state.locks.len(), 1);
        assert!(state.windows.is_empty());
    }

    #[tokio::test]
    async fn test_scan_filters_by_prefix() {
        let store = MemoryLockStore::new();
        store.set_if_absent("lock:x", "t1", Duration::from_secs(60)).await.unwrap();
        store.set_if_absent("other:y", "t1", Duration::from_secs(60)).await.unwrap();

        let found = store.scan_locks("lock:").await.unwrap();
        assert_eq!(found, vec![("lock:x".to_string(), "t1".to_string())]);
    }
}
