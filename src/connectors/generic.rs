//! 通用网页连接器
//!
//! 识别不出平台的 URL 都落到这里，不需要登录态。

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use super::fetch::{fetch_items, FetchPlan};
use super::{scripts, Connector, ItemReport, Operation, OperationContext, Platform};
use crate::error::ControlResult;

/// 摘要保留的字段
const SUMMARY_FIELDS: [&str; 5] = ["title", "description", "keywords", "summary", "url"];

/// 通用网页连接器
pub struct GenericConnector;

#[async_trait]
impl Connector for GenericConnector {
    fn platform(&self) -> Platform {
        Platform::Generic
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(operation, Operation::ExtractSummary | Operation::GetDetails)
    }

    async fn extract_summary(&self, ctx: &OperationContext, urls: Vec<String>) -> ControlResult<Vec<ItemReport>> {
        let plan = FetchPlan {
            operation: Operation::ExtractSummary,
            script: scripts::GENERIC_PAGE.to_string(),
            post: |raw| Ok(page_summary(&check_page(raw)?)),
            instruction: "概括这个网页：标题、描述和 300 字以内的摘要".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "description": { "type": "string" },
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
            script: scripts::GENERIC_PAGE.to_string(),
            post: check_page,
            instruction: "提取这个网页的标题、描述、正文全文，以及主要的链接和图片".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "content": { "type": "string" },
                    "links": {
                        "type": "array",
                        "items": { "type": "object", "properties": { "url": { "type": "string" }, "text": { "type": "string" } } }
                    },
                    "images": {
                        "type": "array",
                        "items": { "type": "object", "properties": { "url": { "type": "string" }, "alt": { "type": "string" } } }
                    }
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

fn check_page(raw: JsonValue) -> Result<JsonValue> {
    let content_length = raw.get("content_length").and_then(JsonValue::as_u64).unwrap_or(0);
    if content_length == 0 {
        bail!("页面没有正文");
    }
    Ok(raw)
}

fn page_summary(page: &JsonValue) -> JsonValue {
    let kept = SUMMARY_FIELDS
        .iter()
        .filter_map(|key| page.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect::<serde_json::Map<_, _>>();
    JsonValue::Object(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_drops_body() {
        let page = json!({
            "title": "Release notes",
            "description": "v2",
            "content": "long body",
            "content_length": 9,
            "summary": "long body",
            "links": [],
            "url": "https://example.com/notes"
        });
        let summary = page_summary(&check_page(page).unwrap());
        assert_eq!(summary["url"], "https://example.com/notes");
        assert!(summary.get("content").is_none());
        assert!(summary.get("links").is_none());
    }

    #[test]
    fn test_blank_page_triggers_fallback() {
        assert!(check_page(json!({"title": "", "content_length": 0})).is_err());
    }
}
