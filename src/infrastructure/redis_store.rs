//! Redis 锁存储
//!
//! - 加锁: `SET key holder NX PX ttl`，TTL 与写入在同一条命令里
//! - 解锁: Lua 脚本比较持有者后删除
//! - 限流: Lua 脚本在有序集合上裁剪、计数、写入，时间取 Redis 服务端 `TIME`

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, Script};
use std::time::Duration;
use tracing::{debug, info};

use super::lock_store::{LockStore, StoreError};

const COMPARE_AND_DELETE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const SLIDING_WINDOW: &str = r#"
local t = redis.call("TIME")
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local window = tonumber(ARGV[1])
local max_requests = tonumber(ARGV[2])
redis.call("ZREMRANGEBYSCORE", KEYS[1], "-inf", now - window)
local count = redis.call("ZCARD", KEYS[1])
if count < max_requests then
    redis.call("ZADD", KEYS[1], now, ARGV[3])
    redis.call("PEXPIRE", KEYS[1], window)
    return 1
end
return 0
"#;

/// Redis 锁存储
pub struct RedisLockStore {
    conn: ConnectionManager,
    compare_and_delete: Script,
    sliding_window: Script,
}

impl RedisLockStore {
    /// 连接 Redis
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        info!(url = %url, "[锁] 正在连接 Redis");

        let client = Client::open(url).map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        info!("[锁] Redis 连接成功");

        Ok(Self {
            conn,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            sliding_window: Script::new(SLIDING_WINDOW),
        })
    }
}

fn command_failed(e: redis::RedisError) -> StoreError {
    if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() {
        StoreError::ConnectionFailed(e.to_string())
    } else {
        StoreError::CommandFailed(e.to_string())
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;

        debug!(key = %key, ttl_ms, granted = reply.is_some(), "SET NX PX");
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, holder: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(holder)
            .invoke_async(&mut conn)
            .await
            .map_err(command_failed)?;
        Ok(deleted > 0)
    }

    async fn admit_sliding_window(
        &self,
        key: &str,
        window: Duration,
        max_requests: u32,
        member: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let admitted: i64 = self
            .sliding_window
            .key(key)
            .arg(window.as_millis() as u64)
            .arg(max_requests)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(command_failed)?;
        Ok(admitted == 1)
    }

    async fn scan_locks(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys: Vec<String> = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(command_failed)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            // 扫描与读取之间锁可能已经过期，过期的直接跳过
            let holder: Option<String> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(command_failed)?;
            if let Some(holder) = holder {
                found.push((key, holder));
            }
        }
        Ok(found)
    }
}
