/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    // --- 锁存储 ---
    pub redis_url: String,
    /// 未配置频率限制的操作使用的锁 TTL（秒）
    pub default_lock_ttl_secs: u64,
    /// 启动时清理不属于任何活跃任务的残留锁
    pub sweep_locks_on_startup: bool,
    /// 频率限制表（TOML），为空时使用内置表
    pub rate_limits_file: Option<String>,
    // --- 浏览器自动化服务商 ---
    pub provider_base_url: String,
    pub provider_api_key: String,
    pub browser_locale: String,
    // --- 执行策略 ---
    pub fast_path_timeout_ms: u64,
    pub agent_path_timeout_secs: u64,
    pub batch_size: usize,
    pub intra_batch_concurrency: usize,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 任务描述文件
    pub job_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            default_lock_ttl_secs: 180,
            sweep_locks_on_startup: true,
            rate_limits_file: None,
            provider_base_url: "http://127.0.0.1:8600/v1".to_string(),
            provider_api_key: String::new(),
            browser_locale: "zh-CN".to_string(),
            fast_path_timeout_ms: 3000,
            agent_path_timeout_secs: 90,
            batch_size: 3,
            intra_batch_concurrency: 2,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            job_file: "job.toml".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(default.redis_url),
            default_lock_ttl_secs: std::env::var("DEFAULT_LOCK_TTL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.default_lock_ttl_secs),
            sweep_locks_on_startup: std::env::var("SWEEP_LOCKS_ON_STARTUP").ok().and_then(|v| v.parse().ok()).unwrap_or(default.sweep_locks_on_startup),
            rate_limits_file: std::env::var("RATE_LIMITS_FILE").ok().filter(|v| !v.is_empty()),
            provider_base_url: std::env::var("PROVIDER_BASE_URL").unwrap_or(default.provider_base_url),
            provider_api_key: std::env::var("PROVIDER_API_KEY").unwrap_or(default.provider_api_key),
            browser_locale: std::env::var("BROWSER_LOCALE").unwrap_or(default.browser_locale),
            fast_path_timeout_ms: std::env::var("FAST_PATH_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.fast_path_timeout_ms),
            agent_path_timeout_secs: std::env::var("AGENT_PATH_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.agent_path_timeout_secs),
            batch_size: std::env::var("BATCH_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.batch_size),
            intra_batch_concurrency: std::env::var("INTRA_BATCH_CONCURRENCY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.intra_batch_concurrency),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            job_file: std::env::var("JOB_FILE").unwrap_or(default.job_file),
        }
    }
}
