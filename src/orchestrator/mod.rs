//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责任务生命周期和分批调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `task_scope` - 控制面与任务作用域
//! - 串起频率限制、加锁、连接器执行、解锁
//! - 任务结束或被取消时回收锁和会话
//!
//! ### `batch_processor` - 分批调度
//! - 批与批串行，批内 Semaphore 限流
//! - 单个条目失败只影响该条目
//!
//! ## 层次关系
//!
//! ```text
//! task_scope (一次操作)
//!     ↓
//! connectors (按平台路由)
//!     ↓
//! batch_processor (Vec<条目>)
//!     ↓
//! workflow::HybridExecutor (单个条目)
//!     ↓
//! services / session / infrastructure
//! ```

pub mod batch_processor;
pub mod task_scope;

pub use batch_processor::{run_batched, BatchParams};
pub use task_scope::{ControlPlane, TaskScope};
