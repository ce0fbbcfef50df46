use serde::Deserialize;
use std::time::Duration;

use crate::config::Config;
use crate::connectors::{OperationRequest, Platform};
use crate::coordination::AdmissionPolicy;
use crate::orchestrator::BatchParams;

/// 任务描述文件
///
/// ```toml
/// source = "crm"
/// source_id = "user-42"
/// batch_size = 3
/// concurrency = 2
///
/// [request]
/// operation = "get_details"
/// urls = ["https://www.xiaohongshu.com/explore/65a1b2c3"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    /// 缺省时自动生成
    #[serde(default)]
    pub task_id: Option<String>,
    pub source: String,
    pub source_id: String,
    /// 缺省时根据第一个 URL 判断
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// 被限流或锁被占用时的最多尝试次数，缺省为 1（立即失败）
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub retry_backoff_secs: Option<u64>,
    pub request: OperationRequest,
}

impl Job {
    pub fn task_id(&self) -> String {
        self.task_id
            .clone()
            .unwrap_or_else(|| format!("job-{}", uuid::Uuid::new_v4()))
    }

    pub fn platform(&self) -> Platform {
        if let Some(platform) = self.platform {
            return platform;
        }
        match &self.request {
            OperationRequest::ExtractSummary { urls } | OperationRequest::GetDetails { urls } => urls
                .first()
                .map(|url| Platform::detect(url))
                .unwrap_or(Platform::Generic),
            _ => Platform::Generic,
        }
    }

    pub fn batch_params(&self, config: &Config) -> BatchParams {
        BatchParams::new(
            self.batch_size.unwrap_or(config.batch_size),
            self.concurrency.unwrap_or(config.intra_batch_concurrency),
        )
    }

    pub fn admission(&self) -> AdmissionPolicy {
        match self.retry_attempts {
            Some(attempts) if attempts > 1 => AdmissionPolicy::patient(
                attempts,
                Duration::from_secs(self.retry_backoff_secs.unwrap_or(10)),
            ),
            _ => AdmissionPolicy::fail_fast(),
        }
    }
}
