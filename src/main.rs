use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use connector_plane::infrastructure::HttpAutomationProvider;
use connector_plane::utils::logging;
use connector_plane::workflow::HybridOptions;
use connector_plane::{load_job, Account, Config, ControlPlane, LlmService, RateLimitTable, RedisLockStore};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 加载配置
    let config = Config::from_env();
    logging::log_startup(config.batch_size, config.intra_batch_concurrency);

    // 初始化控制面
    let store = RedisLockStore::connect(&config.redis_url)
        .await
        .with_context(|| format!("无法连接锁存储: {}", config.redis_url))?;
    let provider = HttpAutomationProvider::new(
        config.provider_base_url.clone(),
        config.provider_api_key.clone(),
        config.browser_locale.clone(),
    );
    let agent = LlmService::new(&config);

    let rate_limits = match &config.rate_limits_file {
        Some(path) => RateLimitTable::load(Path::new(path)).await?,
        None => RateLimitTable::builtin(),
    };

    let plane = ControlPlane::new(Arc::new(store), rate_limits, Arc::new(provider), Arc::new(agent))
        .with_hybrid_options(HybridOptions::from_config(&config))
        .with_default_lock_ttl(Duration::from_secs(config.default_lock_ttl_secs));

    if config.sweep_locks_on_startup {
        let swept = plane.sweep_orphans().await?;
        tracing::info!("🧹 已清理残留锁 {} 个", swept);
    }

    // 执行任务
    let job = load_job(Path::new(&config.job_file)).await?;
    let account = Account::new(job.source.clone(), job.source_id.clone())?;
    let platform = job.platform();
    let batch = job.batch_params(&config);
    let admission = job.admission();

    let scope = plane.begin_task(job.task_id(), account)?;
    let result = scope.run(platform, job.request, batch, admission).await;
    scope.finish().await?;

    let reports = result?;
    println!("{}", serde_json::to_string_pretty(&reports)?);

    let stats = plane.path_stats();
    tracing::info!(
        "📈 路径统计: 快速路径 {}, 智能体路径 {}, 失败 {}",
        stats.fast_path,
        stats.agent_path,
        stats.failed
    );

    Ok(())
}
