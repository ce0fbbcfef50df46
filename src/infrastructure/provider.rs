//! 云浏览器服务商客户端 - 基础设施层
//!
//! 服务商负责真正的浏览器实例与持久化登录态（Context），本模块只把它的
//! HTTP 接口封装成 [`AutomationProvider`]，不保存任何 cookie 原文。

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// 服务商返回的会话信息
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    /// CDP WebSocket 端点
    pub endpoint_url: String,
}

/// 浏览器自动化服务商
#[async_trait]
pub trait AutomationProvider: Send + Sync {
    /// 查询持久化 Context 是否存在，`create` 为 true 时不存在则创建
    async fn get_context(&self, context_id: &str, create: bool) -> Result<bool>;

    /// 创建会话，可选挂载 Context 继承登录态
    async fn create_session(&self, context_id: Option<&str>) -> Result<SessionInfo>;

    /// 删除会话；`sync_context` 为 true 时先把状态写回 Context
    async fn delete_session(&self, session_id: &str, sync_context: bool) -> Result<()>;

    /// 让服务商的 AI 在会话里执行一段自然语言指令
    async fn agent_act(&self, session_id: &str, instruction: &str) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    error_message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self, action: &str) -> Result<Option<T>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(anyhow!(
                "{} 失败: {}",
                action,
                self.error_message.unwrap_or_else(|| "未知错误".to_string())
            ))
        }
    }
}

#[derive(Debug, Serialize)]
struct BrowserOptions<'a> {
    width: u32,
    height: u32,
    solve_captchas: bool,
    use_stealth: bool,
    locales: Vec<&'a str>,
}

/// HTTP 服务商客户端
pub struct HttpAutomationProvider {
    client: Client,
    base_url: String,
    api_key: String,
    locale: String,
}

impl HttpAutomationProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            locale: locale.into(),
        }
    }

    /// 在 base_url 后追加路径段，每段单独编码
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).with_context(|| format!("服务商地址无效: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("服务商地址不能带路径: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl AutomationProvider for HttpAutomationProvider {
    async fn get_context(&self, context_id: &str, create: bool) -> Result<bool> {
        let response = self
            .client
            .get(self.url(&["contexts", context_id])?)
            .bearer_auth(&self.api_key)
            .query(&[("create", create)])
            .send()
            .await
            .context("请求服务商 context 接口失败")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }

        let envelope: Envelope<serde_json::Value> = response.json().await.context("解析 context 响应失败")?;
        Ok(envelope.into_result("获取 context")?.is_some())
    }

    async fn create_session(&self, context_id: Option<&str>) -> Result<SessionInfo> {
        let body = json!({
            "image_id": "browser_latest",
            "context_id": context_id,
            "auto_upload": true,
            "browser": BrowserOptions {
                width: 1920,
                height: 1080,
                solve_captchas: true,
                use_stealth: true,
                locales: vec![self.locale.as_str()],
            },
        });

        debug!("创建会话, context: {:?}", context_id);
        let envelope: Envelope<SessionInfo> = self
            .client
            .post(self.url(&["sessions"])?)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("请求服务商 session 接口失败")?
            .error_for_status()?
            .json()
            .await
            .context("解析 session 响应失败")?;

        envelope
            .into_result("创建会话")?
            .ok_or_else(|| anyhow!("服务商未返回会话信息"))
    }

    async fn delete_session(&self, session_id: &str, sync_context: bool) -> Result<()> {
        let envelope: Envelope<serde_json::Value> = self
            .client
            .delete(self.url(&["sessions", session_id])?)
            .bearer_auth(&self.api_key)
            .query(&[("sync_context", sync_context)])
            .send()
            .await
            .context("请求服务商删除会话失败")?
            .json()
            .await
            .context("解析删除会话响应失败")?;

        envelope.into_result("删除会话")?;
        Ok(())
    }

    async fn agent_act(&self, session_id: &str, instruction: &str) -> Result<bool> {
        let envelope: Envelope<serde_json::Value> = self
            .client
            .post(self.url(&["sessions", session_id, "agent", "act"])?)
            .bearer_auth(&self.api_key)
            .json(&json!({ "instruction": instruction }))
            .send()
            .await
            .context("请求服务商 agent 接口失败")?
            .json()
            .await
            .context("解析 agent 响应失败")?;

        Ok(envelope.success)
    }
}
