//! LLM 服务 - 业务能力层
//!
//! Agent 路径的抽取能力：把页面文本和目标结构交给 LLM，拿回 JSON。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use anyhow::{anyhow, Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::Config;
use crate::utils::truncate_text;

/// 送给 LLM 的页面文本上限（字符）
const MAX_PAGE_CHARS: usize = 12_000;

const SYSTEM_PROMPT: &str = "你是网页信息抽取助手。只根据给出的页面文本回答，\
只输出一个符合给定 JSON Schema 的 JSON 值，不要输出任何解释。页面里没有的字段填 null。";

/// Agent 路径的抽取能力
#[async_trait]
pub trait ExtractionAgent: Send + Sync {
    /// 从页面文本中按 `schema` 抽取结构化数据
    async fn extract(&self, instruction: &str, page_text: &str, schema: &JsonValue) -> Result<JsonValue>;
}

/// LLM 服务
///
/// 职责：
/// - 调用 LLM API 完成页面抽取
/// - 不认识平台，不持有 page
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
        }
    }

    /// 通用的 LLM 调用函数
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    ///
    /// # 返回
    /// 返回 LLM 的响应内容（字符串）
    pub async fn send_to_llm(&self, user_message: &str, system_message: Option<&str>) -> Result<String> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.chars().count());

        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(0.1)
            .max_tokens(2048u32)
            .build()?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            anyhow!("LLM API 调用失败: {}", e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("LLM 返回内容为空"))?;

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl ExtractionAgent for LlmService {
    async fn extract(&self, instruction: &str, page_text: &str, schema: &JsonValue) -> Result<JsonValue> {
        let prompt = format!(
            "任务：{}\n\nJSON Schema：\n{}\n\n页面文本：\n{}",
            instruction,
            serde_json::to_string_pretty(schema)?,
            truncate_text(page_text, MAX_PAGE_CHARS)
        );

        let reply = self.send_to_llm(&prompt, Some(SYSTEM_PROMPT)).await?;
        parse_json_reply(&reply)
    }
}

/// 把 HTML 转成可读文本：去掉 script/style，去标签，合并空白
pub fn html_to_text(html: &str) -> Result<String> {
    let blocks = Regex::new(r"(?is)<(script|style|noscript|svg)\b.*?</(script|style|noscript|svg)>")?;
    let breaks = Regex::new(r"(?i)<(br|/p|/div|/li|/h[1-6]|/tr)\s*/?>")?;
    let tags = Regex::new(r"(?s)<[^>]+>")?;
    let spaces = Regex::new(r"[ \t\r\f\v]+")?;
    let blank_lines = Regex::new(r"\n\s*\n+")?;

    let text = blocks.replace_all(html, " ");
    let text = breaks.replace_all(&text, "\n");
    let text = tags.replace_all(&text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let text = spaces.replace_all(&text, " ");
    let text = blank_lines.replace_all(&text, "\n");

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

/// 解析 LLM 返回的 JSON，兼容 ```json 代码块包裹
pub fn parse_json_reply(reply: &str) -> Result<JsonValue> {
    let fenced = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```")?;
    let body = fenced
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply)
        .trim();

    serde_json::from_str(body).with_context(|| format!("LLM 返回的不是 JSON: {}", truncate_text(body, 80)))
}
