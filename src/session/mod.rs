//! 会话层（Session）
//!
//! 区分两种浏览器状态：
//! - **Context**：持久化登录态，由服务商保存，跨多个会话复用
//! - **Session**：临时自动化实例，按条目创建，用完即删

pub mod context;
pub mod registry;

pub use context::{Account, ContextId};
pub use registry::{Session, SessionRegistry};
