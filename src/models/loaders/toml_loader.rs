use crate::models::job::Job;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

/// 从 TOML 文件加载任务描述
pub async fn load_job(toml_file_path: &Path) -> Result<Job> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取任务文件: {}", toml_file_path.display()))?;

    let job: Job = toml::from_str(&content)
        .with_context(|| format!("无法解析任务文件: {}", toml_file_path.display()))?;

    tracing::info!(
        "已加载任务: {} ({})",
        toml_file_path.display(),
        job.request.operation()
    );

    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_names_path() {
        let err = load_job(Path::new("/nonexistent/job.toml")).await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/job.toml"));
    }
}
