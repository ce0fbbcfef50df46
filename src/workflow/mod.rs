pub mod hybrid;
pub mod item_ctx;

pub use hybrid::{ExecutionPath, HybridExecutor, HybridOptions, PathStats, Served};
pub use item_ctx::ItemCtx;
