//! 小红书连接器
//!
//! 笔记详情、创作者笔记、搜索都要求账号已登录（Context 存在）；
//! 快速路径读 `window.__INITIAL_STATE__`，Agent 路径让 LLM 读页面文本。
//! 登录把 cookie 写进会话，确认登录成功后才回写 Context。

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use super::fetch::{fetch_items, parse_page_state, FetchPlan};
use super::{scripts, Connector, ContentType, ItemReport, Operation, OperationContext, Platform};
use crate::error::{ControlError, ControlResult};
use crate::session::Session;
use crate::workflow::{ExecutionPath, Served};

const HOME_URL: &str = "https://www.xiaohongshu.com";
const PUBLISH_URL: &str = "https://creator.xiaohongshu.com/publish/publish";
const COOKIE_DOMAIN: &str = ".xiaohongshu.com";

/// 单条笔记保留的评论数上限
const MAX_COMMENTS: usize = 50;

/// 小红书连接器
pub struct XiaohongshuConnector;

#[async_trait]
impl Connector for XiaohongshuConnector {
    fn platform(&self) -> Platform {
        Platform::Xiaohongshu
    }

    fn supports(&self, _operation: Operation) -> bool {
        true
    }

    async fn extract_summary(&self, ctx: &OperationContext, urls: Vec<String>) -> ControlResult<Vec<ItemReport>> {
        let context = ctx.context_id();
        ctx.sessions.require_context(&context).await?;

        let plan = FetchPlan {
            operation: Operation::ExtractSummary,
            script: scripts::XHS_NOTE_DETAIL.to_string(),
            post: |raw| note_summary(&flatten_note_detail(&parse_page_state(raw)?)?),
            instruction: "提取这篇小红书笔记的标题、作者昵称、正文前 200 字摘要和点赞数".to_string(),
            schema: summary_schema(),
            context: Some(context),
            limit: None,
        };
        Ok(fetch_items(ctx, plan, url_targets(urls)).await)
    }

    async fn get_details(&self, ctx: &OperationContext, urls: Vec<String>) -> ControlResult<Vec<ItemReport>> {
        let context = ctx.context_id();
        ctx.sessions.require_context(&context).await?;

        let plan = FetchPlan {
            operation: Operation::GetDetails,
            script: scripts::XHS_NOTE_DETAIL.to_string(),
            post: |raw| flatten_note_detail(&parse_page_state(raw)?),
            instruction: "提取这篇小红书笔记的完整信息，包括作者、互动数据、标签和评论".to_string(),
            schema: note_detail_schema(),
            context: Some(context),
            limit: None,
        };
        Ok(fetch_items(ctx, plan, url_targets(urls)).await)
    }

    async fn harvest_user_content(
        &self,
        ctx: &OperationContext,
        creator_ids: Vec<String>,
        limit: Option<usize>,
    ) -> ControlResult<Vec<ItemReport>> {
        let context = ctx.context_id();
        ctx.sessions.require_context(&context).await?;

        let targets = creator_ids
            .into_iter()
            .map(|id| {
                let url = format!("{}/user/profile/{}", HOME_URL, id);
                (id, url)
            })
            .collect();

        let plan = FetchPlan {
            operation: Operation::HarvestUserContent,
            script: scripts::XHS_USER_NOTES.to_string(),
            post: |raw| parse_user_notes(&parse_page_state(raw)?),
            instruction: "列出这个创作者主页上的全部笔记".to_string(),
            schema: feed_list_schema(),
            context: Some(context),
            limit,
        };
        Ok(fetch_items(ctx, plan, targets).await)
    }

    async fn search_and_extract(
        &self,
        ctx: &OperationContext,
        keywords: Vec<String>,
        limit: usize,
        user_id: Option<String>,
    ) -> ControlResult<Vec<ItemReport>> {
        let context = ctx.context_id();
        ctx.sessions.require_context(&context).await?;

        let mut targets = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let url = reqwest::Url::parse_with_params(
                &format!("{}/search_result", HOME_URL),
                &[("keyword", keyword.as_str())],
            )
            .map_err(|e| ControlError::Other(e.into()))?;
            targets.push((keyword, url.to_string()));
        }

        let plan = FetchPlan {
            operation: Operation::SearchAndExtract,
            script: scripts::xhs_search_feeds(user_id.as_deref()),
            post: |raw| parse_feed_list(&parse_page_state(raw)?),
            instruction: match &user_id {
                Some(id) => format!("列出搜索结果里作者 ID 为 {} 的笔记", id),
                None => "列出搜索结果里的笔记".to_string(),
            },
            schema: feed_list_schema(),
            context: Some(context),
            limit: Some(limit),
        };
        Ok(fetch_items(ctx, plan, targets).await)
    }

    async fn publish(
        &self,
        ctx: &OperationContext,
        content: String,
        content_type: ContentType,
        images: Vec<String>,
        tags: Vec<String>,
    ) -> ControlResult<ItemReport> {
        let context = ctx.context_id();
        ctx.sessions.require_context(&context).await?;

        let instruction = publish_instruction(&content, content_type, &images, &tags);
        let item = ctx.item(Operation::Publish, 1, PUBLISH_URL);
        let session = ctx.sessions.create_session(&ctx.task_id, Some(&context)).await?;

        let result: ControlResult<Served<JsonValue>> = async {
            let browser = session.attach().await?;
            let opened = browser.open(PUBLISH_URL).await;
            let served = match opened {
                Ok(page) => {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    let served = ctx
                        .hybrid
                        .agent_only(&item, || async {
                            if session.agent_act(&instruction).await? {
                                Ok(json!({ "content": content, "platform": Platform::Xiaohongshu }))
                            } else {
                                Err(anyhow!("Agent 未能完成发布"))
                            }
                        })
                        .await;
                    if let Err(e) = page.close().await {
                        warn!("{} 关闭页面失败: {}", item, e);
                    }
                    served
                }
                Err(e) => Err(ControlError::Other(e)),
            };
            browser.disconnect();
            served
        }
        .await;

        if let Err(e) = session.close(false).await {
            warn!("{} 删除会话失败: {}", item, e);
        }
        Ok(ItemReport::from_result(PUBLISH_URL, result))
    }

    async fn login(&self, ctx: &OperationContext, cookies: HashMap<String, String>) -> ControlResult<ItemReport> {
        let context = ctx.context_id();
        ctx.sessions.ensure_context(&context).await?;
        info!(task_id = %ctx.task_id, context = %context, "[连接器] 小红书 cookie 登录");

        let session = ctx.sessions.create_session(&ctx.task_id, Some(&context)).await?;
        let verified = verify_cookie_login(&session, &cookies).await;

        // 只有确认登录成功才把状态写回登录态
        let logged_in = matches!(verified, Ok(true));
        if let Err(e) = session.close(logged_in).await {
            warn!(context = %context, "[连接器] 删除登录会话失败: {}", e);
        }

        Ok(match verified {
            Ok(true) => ItemReport::served(
                context.as_str(),
                Served {
                    value: json!({ "context_id": context.as_str(), "logged_in": true }),
                    path: ExecutionPath::FastPath,
                },
            ),
            Ok(false) => ItemReport::rejected(
                context.as_str(),
                ExecutionPath::FastPath,
                "登录失败：cookie 无效或已过期",
                "login_failed",
            ),
            Err(e) => ItemReport::failed(context.as_str(), &e),
        })
    }
}

async fn verify_cookie_login(session: &Session, cookies: &HashMap<String, String>) -> ControlResult<bool> {
    let browser = session.attach().await?;

    let result = async {
        browser.set_cookies(build_cookies(cookies)?).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let page = browser.open(HOME_URL).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let logged_in = login_marker(page.eval_as::<bool>(scripts::XHS_LOGIN_MARKER).await, session.id());
        if let Err(e) = page.close().await {
            warn!(session_id = %session.id(), "[连接器] 关闭登录页失败: {:#}", e);
        }
        Ok::<bool, anyhow::Error>(logged_in)
    }
    .await;

    browser.disconnect();
    result.map_err(ControlError::Other)
}

/// 检测失败按未登录处理，不回写登录态
fn login_marker(result: Result<bool>, session_id: &str) -> bool {
    match result {
        Ok(logged_in) => logged_in,
        Err(e) => {
            warn!(session_id = %session_id, "[连接器] 登录标记检测失败，按未登录处理: {:#}", e);
            false
        }
    }
}

fn build_cookies(cookies: &HashMap<String, String>) -> Result<Vec<CookieParam>> {
    let expires = TimeSinceEpoch::new((chrono::Utc::now().timestamp() + 86_400) as f64);
    cookies
        .iter()
        .map(|(name, value)| {
            CookieParam::builder()
                .name(name)
                .value(value)
                .domain(COOKIE_DOMAIN)
                .path("/")
                .expires(expires.clone())
                .build()
                .map_err(|e| anyhow!("cookie {} 无效: {}", name, e))
        })
        .collect()
}

fn url_targets(urls: Vec<String>) -> Vec<(String, String)> {
    urls.into_iter().map(|url| (url.clone(), url)).collect()
}

fn publish_instruction(content: &str, content_type: ContentType, images: &[String], tags: &[String]) -> String {
    let tags = tags.join(", ");
    match content_type {
        ContentType::Image if !images.is_empty() => format!(
            "发布图文笔记：内容「{}」，上传图片：{}，添加标签：{}",
            content,
            images.join(", "),
            tags
        ),
        ContentType::Video => format!("发布视频笔记：内容「{}」，添加标签：{}", content, tags),
        _ => format!("发布文字笔记：内容「{}」，添加标签：{}", content, tags),
    }
}

fn str_field<'a>(value: &'a JsonValue, key: &str) -> &'a str {
    value.get(key).and_then(JsonValue::as_str).unwrap_or_default()
}

/// 互动数有时是数字，有时是字符串
fn count_field(value: &JsonValue, key: &str) -> u64 {
    match value.get(key) {
        Some(JsonValue::Number(n)) => n.as_u64().unwrap_or(0),
        Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// 把 `noteDetailMap` 的第一条笔记整理成扁平结构
pub fn flatten_note_detail(detail_map: &JsonValue) -> Result<JsonValue> {
    let Some(entry) = detail_map.as_object().and_then(|m| m.values().next()) else {
        bail!("noteDetailMap 为空");
    };
    let note = entry.get("note").unwrap_or(&JsonValue::Null);
    if note.get("noteId").is_none() && note.get("title").is_none() {
        bail!("noteDetailMap 里没有笔记");
    }

    let empty = JsonValue::Null;
    let user = note.get("user").unwrap_or(&empty);
    let interact = note.get("interactInfo").unwrap_or(&empty);

    let images: Vec<JsonValue> = note
        .get("imageList")
        .and_then(JsonValue::as_array)
        .map(|list| {
            list.iter()
                .map(|img| {
                    json!({
                        "url": str_field(img, "urlDefault"),
                        "width": img.get("width").cloned().unwrap_or(json!(0)),
                        "height": img.get("height").cloned().unwrap_or(json!(0)),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let tags: Vec<&str> = note
        .get("tagList")
        .and_then(JsonValue::as_array)
        .map(|list| {
            list.iter()
                .map(|t| str_field(t, "name"))
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let comments: Vec<JsonValue> = entry
        .get("comments")
        .and_then(|c| c.get("list"))
        .and_then(JsonValue::as_array)
        .map(|list| {
            list.iter()
                .take(MAX_COMMENTS)
                .map(|c| {
                    json!({
                        "content": str_field(c, "content"),
                        "user_nickname": c.get("userInfo").map(|u| str_field(u, "nickname")).unwrap_or_default(),
                        "likes": count_field(c, "likeCount"),
                        "time": c.get("createTime").cloned().unwrap_or(JsonValue::Null),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let time = note.get("time").and_then(JsonValue::as_i64);
    let update_time = time
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|dt| dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();

    Ok(json!({
        "note_id": note.get("noteId").cloned().unwrap_or(JsonValue::Null),
        "title": str_field(note, "title"),
        "desc": str_field(note, "desc"),
        "type": str_field(note, "type"),
        "time": time,
        "update_time": update_time,
        "user_id": str_field(user, "userId"),
        "user_nickname": str_field(user, "nickname"),
        "user_avatar": str_field(user, "avatar"),
        "liked_count": count_field(interact, "likedCount"),
        "collected_count": count_field(interact, "collectedCount"),
        "comment_count": count_field(interact, "commentCount"),
        "share_count": count_field(interact, "shareCount"),
        "images": images,
        "tags": tags,
        "comments": comments,
    }))
}

/// 从扁平详情里取摘要字段
fn note_summary(detail: &JsonValue) -> Result<JsonValue> {
    let desc = str_field(detail, "desc");
    Ok(json!({
        "title": str_field(detail, "title"),
        "user_nickname": str_field(detail, "user_nickname"),
        "summary": crate::utils::truncate_text(desc, 200),
        "liked_count": detail.get("liked_count").cloned().unwrap_or(json!(0)),
    }))
}

/// 整理一条 feed
pub fn parse_feed_item(feed: &JsonValue) -> Option<JsonValue> {
    let card = feed.get("noteCard")?;
    let note_id = feed.get("id").and_then(JsonValue::as_str)?;
    let xsec_token = str_field(feed, "xsecToken");

    let url = format!("{}/explore/{}", HOME_URL, note_id);
    let full_url = if xsec_token.is_empty() {
        url.clone()
    } else {
        format!("{}?xsec_token={}&xsec_source=pc_feed", url, xsec_token)
    };

    let empty = JsonValue::Null;
    let interact = card.get("interactInfo").unwrap_or(&empty);
    let user = card.get("user").unwrap_or(&empty);

    Some(json!({
        "note_id": note_id,
        "title": str_field(card, "displayTitle"),
        "url": url,
        "full_url": full_url,
        "liked_count": count_field(interact, "likedCount"),
        "cover": card.get("cover").cloned().unwrap_or(json!({})),
        "is_pinned": interact.get("sticky").and_then(JsonValue::as_bool).unwrap_or(false),
        "user": {
            "id": str_field(user, "userId"),
            "name": str_field(user, "nickname"),
        },
    }))
}

/// 搜索结果 feed 列表
fn parse_feed_list(feeds: &JsonValue) -> Result<JsonValue> {
    let items: Vec<JsonValue> = feeds
        .as_array()
        .map(|list| list.iter().filter_map(parse_feed_item).collect())
        .unwrap_or_default();
    if items.is_empty() {
        bail!("没有解析出任何笔记");
    }
    Ok(JsonValue::Array(items))
}

/// 创作者主页的 `user.notes` 是按 tab 分组的二维数组
fn parse_user_notes(groups: &JsonValue) -> Result<JsonValue> {
    let flattened: Vec<JsonValue> = groups
        .as_array()
        .map(|groups| {
            groups
                .iter()
                .filter_map(JsonValue::as_array)
                .flatten()
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    parse_feed_list(&JsonValue::Array(flattened))
}

fn summary_schema() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "user_nickname": { "type": "string" },
            "summary": { "type": "string" },
            "liked_count": { "type": "integer" }
        },
        "required": ["title", "summary"]
    })
}

fn note_detail_schema() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "desc": { "type": "string" },
            "user_nickname": { "type": "string" },
            "liked_count": { "type": "integer" },
            "collected_count": { "type": "integer" },
            "comment_count": { "type": "integer" },
            "tags": { "type": "array", "items": { "type": "string" } },
            "comments": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "content": { "type": "string" },
                        "user_nickname": { "type": "string" }
                    }
                }
            }
        },
        "required": ["title", "desc"]
    })
}

fn feed_list_schema() -> JsonValue {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "url": { "type": "string" },
                "liked_count": { "type": "integer" },
                "user": {
                    "type": "object",
                    "properties": { "name": { "type": "string" } }
                }
            },
            "required": ["title"]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_detail_map() -> JsonValue {
        json!({
            "65a1b2c3": {
                "note": {
                    "noteId": "65a1b2c3",
                    "title": "春日露营清单",
                    "desc": "带上这些东西就够了",
                    "type": "normal",
                    "time": 1_700_000_000_000i64,
                    "user": { "userId": "u1", "nickname": "露营小王", "avatar": "https://img/a.jpg" },
                    "interactInfo": { "likedCount": "1024", "collectedCount": 300, "commentCount": "12", "shareCount": "5" },
                    "imageList": [{ "urlDefault": "https://img/1.jpg", "width": 1080, "height": 1440 }],
                    "tagList": [{ "name": "露营" }, { "name": "" }]
                },
                "comments": {
                    "list": [{ "content": "求链接", "userInfo": { "nickname": "阿花" }, "likeCount": "3", "createTime": 1 }]
                }
            }
        })
    }

    #[test]
    fn test_flatten_note_detail() {
        let flat = flatten_note_detail(&sample_detail_map()).unwrap();
        assert_eq!(flat["note_id"], "65a1b2c3");
        assert_eq!(flat["user_nickname"], "露营小王");
        assert_eq!(flat["liked_count"], 1024);
        assert_eq!(flat["collected_count"], 300);
        assert_eq!(flat["tags"], json!(["露营"]));
        assert_eq!(flat["images"][0]["width"], 1080);
        assert_eq!(flat["comments"][0]["user_nickname"], "阿花");
        assert_eq!(flat["comments"][0]["likes"], 3);
        assert!(!flat["update_time"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_flatten_rejects_empty_map() {
        assert!(flatten_note_detail(&json!({})).is_err());
        assert!(flatten_note_detail(&json!({"x": {"comments": {}}})).is_err());
    }

    #[test]
    fn test_parse_feed_item_builds_urls() {
        let feed = json!({
            "id": "abc",
            "xsecToken": "tok",
            "noteCard": {
                "displayTitle": "咖啡探店",
                "interactInfo": { "likedCount": "88", "sticky": true },
                "user": { "userId": "u9", "nickname": "豆豆" }
            }
        });
        let item = parse_feed_item(&feed).unwrap();
        assert_eq!(item["url"], "https://www.xiaohongshu.com/explore/abc");
        assert_eq!(
            item["full_url"],
            "https://www.xiaohongshu.com/explore/abc?xsec_token=tok&xsec_source=pc_feed"
        );
        assert_eq!(item["liked_count"], 88);
        assert_eq!(item["is_pinned"], true);
        assert_eq!(item["user"]["name"], "豆豆");

        assert!(parse_feed_item(&json!({"id": "no-card"})).is_none());
    }

    #[test]
    fn test_user_notes_are_flattened() {
        let groups = json!([
            [{ "id": "a", "noteCard": { "displayTitle": "一" } }],
            [],
            [{ "id": "b", "noteCard": { "displayTitle": "二" } }]
        ]);
        let notes = parse_user_notes(&groups).unwrap();
        assert_eq!(notes.as_array().unwrap().len(), 2);
        assert!(parse_user_notes(&json!([[], []])).is_err());
    }

    #[test]
    fn test_publish_instruction_by_type() {
        let tags = vec!["露营".to_string()];
        let images = vec!["https://img/1.jpg".to_string()];
        assert!(publish_instruction("hi", ContentType::Image, &images, &tags).starts_with("发布图文笔记"));
        assert!(publish_instruction("hi", ContentType::Image, &[], &tags).starts_with("发布文字笔记"));
        assert!(publish_instruction("hi", ContentType::Video, &[], &tags).starts_with("发布视频笔记"));
    }

    #[test]
    fn test_login_marker_error_counts_as_logged_out() {
        assert!(login_marker(Ok(true), "s-1"));
        assert!(!login_marker(Ok(false), "s-1"));
        assert!(!login_marker(Err(anyhow!("Execution context was destroyed")), "s-1"));
    }
}
