/// 日志工具模块
///
/// 初始化 tracing 订阅者，并提供批次进度的日志辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化日志
///
/// 读取 `RUST_LOG`，默认 `info`。重复调用是安全的（测试中会多次调用）。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(batch_size: usize, concurrency: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 连接器控制面启动");
    info!("📊 默认批大小: {}, 批内并发: {}", batch_size, concurrency);
    info!("{}", "=".repeat(60));
}

/// 记录批次开始信息
///
/// # 参数
/// - `batch_num`: 批次编号（从 1 开始）
/// - `total_batches`: 批次总数
/// - `start`: 起始条目编号
/// - `end`: 结束条目编号
/// - `total`: 条目总数
pub fn log_batch_start(batch_num: usize, total_batches: usize, start: usize, end: usize, total: usize) {
    info!("📦 [批次] 开始处理第 {}/{} 批, 条目 {}-{} / 共 {} 个", batch_num, total_batches, start, end, total);
}

/// 记录批次完成信息
pub fn log_batch_complete(batch_num: usize, success: usize, total: usize) {
    info!("✓ [批次] 第 {} 批完成: 成功 {}/{}", batch_num, success, total);
}

/// 打印最终统计信息
pub fn log_final_stats(label: &str, success: usize, total: usize) {
    info!("{}", "─".repeat(60));
    info!("📊 {} 完成 ({})", label, chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("✅ 成功: {}/{}", success, total);
    info!("❌ 失败: {}", total.saturating_sub(success));
    info!("{}", "─".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大字符数
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
