//! 基础设施层（Infrastructure）
//!
//! 持有稀缺资源（存储连接、服务商客户端、page），只暴露能力

pub mod js_executor;
pub mod lock_store;
pub mod memory_store;
pub mod provider;
pub mod redis_store;

pub use js_executor::JsExecutor;
pub use lock_store::{LockStore, StoreError};
pub use memory_store::MemoryLockStore;
pub use provider::{AutomationProvider, HttpAutomationProvider, SessionInfo};
pub use redis_store::RedisLockStore;
