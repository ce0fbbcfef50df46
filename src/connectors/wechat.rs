//! 微信公众号连接器
//!
//! 只处理公开文章，不需要登录态，会话不挂载 Context。

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use super::fetch::{fetch_items, FetchPlan};
use super::{scripts, Connector, ItemReport, Operation, OperationContext, Platform};
use crate::error::ControlResult;

/// 微信公众号连接器
pub struct WechatConnector;

#[async_trait]
impl Connector for WechatConnector {
    fn platform(&self) -> Platform {
        Platform::Wechat
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(operation, Operation::ExtractSummary | Operation::GetDetails)
    }

    async fn extract_summary(&self, ctx: &OperationContext, urls: Vec<String>) -> ControlResult<Vec<ItemReport>> {
        let plan = FetchPlan {
            operation: Operation::ExtractSummary,
            script: scripts::WECHAT_ARTICLE.to_string(),
            post: |raw| article_summary(&check_article(raw)?),
            instruction: "提取这篇公众号文章的标题、作者、发布时间和 200 字以内的摘要".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "author": { "type": "string" },
                    "publish_time": { "type": "string" },
                    "summary": { "type": "string" }
                },
                "required": ["title", "summary"]
            }),
            context: None,
            limit: None,
        };
        let targets = urls.into_iter().map(|url| (url.clone(), url)).collect();
        Ok(fetch_items(ctx, plan, targets).await)
    }

    async fn get_details(&self, ctx: &OperationContext, urls: Vec<String>) -> ControlResult<Vec<ItemReport>> {
        let plan = FetchPlan {
            operation: Operation::GetDetails,
            script: scripts::WECHAT_ARTICLE.to_string(),
            post: check_article,
            instruction: "提取这篇公众号文章的标题、作者、发布时间、正文全文和正文里的图片地址".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "author": { "type": "string" },
                    "publish_time": { "type": "string" },
                    "content": { "type": "string" },
                    "images": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["title", "content"]
            }),
            context: None,
            limit: None,
        };
        let targets = urls.into_iter().map(|url| (url.clone(), url)).collect();
        Ok(fetch_items(ctx, plan, targets).await)
    }
}

/// 标题和正文都为空说明页面不是正常的文章（已删除、需要验证等）
fn check_article(raw: JsonValue) -> Result<JsonValue> {
    let has = |key: &str| {
        raw.get(key)
            .and_then(JsonValue::as_str)
            .is_some_and(|s| !s.is_empty())
    };
    if !has("title") && !has("content") {
        bail!("页面上没有文章内容");
    }
    Ok(raw)
}

fn article_summary(article: &JsonValue) -> Result<JsonValue> {
    let field = |key: &str| article.get(key).cloned().unwrap_or(JsonValue::Null);
    Ok(json!({
        "title": field("title"),
        "author": field("author"),
        "publish_time": field("publish_time"),
        "summary": field("summary"),
        "url": field("url"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_article_rejects_blank_page() {
        assert!(check_article(json!({"title": "", "content": ""})).is_err());
        assert!(check_article(json!({"title": "周报", "content": ""})).is_ok());
    }

    #[test]
    fn test_summary_keeps_only_headline_fields() {
        let article = json!({
            "title": "周报",
            "author": "编辑部",
            "publish_time": "2024-05-01",
            "content": "很长的正文",
            "summary": "很长的正文",
            "images": ["https://img/1.png"]
        });
        let summary = article_summary(&article).unwrap();
        assert_eq!(summary["title"], "周报");
        assert!(summary.get("content").is_none());
        assert!(summary.get("images").is_none());
    }
}
