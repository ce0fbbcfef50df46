//! # Connector Plane
//!
//! 面向社交/内容平台的连接器控制面：按账号加分布式锁、按平台和操作限流、
//! 管理浏览器会话与持久化上下文、分批并发执行，并在快速路径（页面脚本）
//! 和智能体路径（LLM 抽取 / 浏览器智能体）之间自动回退。
//!
//! ## 架构设计
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（锁存储、自动化服务商、Page），只暴露能力
//! - `LockStore` - Redis / 内存两种实现
//! - `JsExecutor` - 唯一的 page owner，提供 eval() 能力
//!
//! ### ② 协调层（Coordination）
//! - `coordination/` - 分布式锁、频率限制、准入策略
//!
//! ### ③ 业务能力层（Services / Session）
//! - `services/` - LLM 抽取能力
//! - `session/` - 账号、上下文、会话登记
//!
//! ### ④ 流程层（Workflow）
//! - `workflow/` - 单个条目的快速路径 → 智能体路径
//!
//! ### ⑤ 连接器层（Connectors）
//! - `connectors/` - 各平台的操作实现和路由
//!
//! ### ⑥ 编排层（Orchestration）
//! - `orchestrator/task_scope` - 一次操作的完整生命周期
//! - `orchestrator/batch_processor` - 分批并发调度
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod connectors;
pub mod coordination;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod session;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use connectors::{Connector, ConnectorRegistry, ItemReport, Operation, OperationRequest, Platform};
pub use coordination::{AdmissionPolicy, LockKey, LockManager, RateLimitTable, RateLimiter, RetryPolicy};
pub use error::{ControlError, ControlResult};
pub use infrastructure::{AutomationProvider, LockStore, MemoryLockStore, RedisLockStore};
pub use models::{load_job, Job};
pub use orchestrator::{run_batched, BatchParams, ControlPlane, TaskScope};
pub use services::{ExtractionAgent, LlmService};
pub use session::{Account, ContextId, SessionRegistry};
pub use workflow::{ExecutionPath, HybridExecutor, HybridOptions};
