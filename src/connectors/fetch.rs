//! 逐条目抓取
//!
//! 每个条目：创建独立会话 → 连接浏览器 → 打开页面 → 混合执行 → 删除会话。
//! 条目之间按 [`BatchParams`](crate::orchestrator::BatchParams) 分批并发。

use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use super::{ItemReport, OperationContext, Operation};
use crate::error::{ControlError, ControlResult};
use crate::infrastructure::JsExecutor;
use crate::orchestrator::run_batched;
use crate::services::{html_to_text, ExtractionAgent};
use crate::session::{ContextId, Session};
use crate::utils::truncate_text;
use crate::workflow::{ItemCtx, Served};

/// 一次抓取操作的描述
pub(crate) struct FetchPlan {
    pub operation: Operation,
    /// 快速路径脚本
    pub script: String,
    /// 快速路径结果的整理函数，返回错误时回退 Agent 路径
    pub post: fn(JsonValue) -> Result<JsonValue>,
    /// Agent 路径的任务描述与目标结构
    pub instruction: String,
    pub schema: JsonValue,
    /// 需要登录态时挂载的 Context
    pub context: Option<ContextId>,
    /// 结果是数组时最多保留的条数
    pub limit: Option<usize>,
}

/// 逐条目抓取，返回与 `targets` 一一对应的结果
///
/// `targets` 的每一项是 (条目标识, 要打开的 URL)
pub(crate) async fn fetch_items(
    ctx: &OperationContext,
    plan: FetchPlan,
    targets: Vec<(String, String)>,
) -> Vec<ItemReport> {
    let keys: Vec<String> = targets.iter().map(|(key, _)| key.clone()).collect();
    let plan = Arc::new(plan);

    let outcomes = run_batched(targets, ctx.batch, |index, (key, url)| {
        let ctx = ctx.clone();
        let plan = Arc::clone(&plan);
        async move {
            let item = ctx.item(plan.operation, index + 1, &key);
            fetch_one(&ctx, &plan, &item, &url).await
        }
    })
    .await;

    keys.into_iter()
        .zip(outcomes)
        .map(|(key, outcome)| ItemReport::from_result(key, outcome))
        .collect()
}

async fn fetch_one(
    ctx: &OperationContext,
    plan: &FetchPlan,
    item: &ItemCtx,
    url: &str,
) -> ControlResult<Served<JsonValue>> {
    info!("{} 开始处理: {}", item, truncate_text(url, 80));

    let session = ctx
        .sessions
        .create_session(&ctx.task_id, plan.context.as_ref())
        .await?;

    let result = browse(ctx, plan, item, &session, url).await;

    // 读操作不回写登录态
    if let Err(e) = session.close(false).await {
        warn!("{} 删除会话失败: {}", item, e);
    }

    result.map(|served| Served {
        value: apply_limit(served.value, plan.limit),
        path: served.path,
    })
}

async fn browse(
    ctx: &OperationContext,
    plan: &FetchPlan,
    item: &ItemCtx,
    session: &Session,
    url: &str,
) -> ControlResult<Served<JsonValue>> {
    let browser = session.attach().await?;

    let page = match browser.open(url).await {
        Ok(page) => page,
        Err(e) => {
            browser.disconnect();
            return Err(ControlError::Other(e));
        }
    };

    let served = ctx
        .hybrid
        .execute(
            item,
            || fast_path(&page, plan),
            || agent_path(&page, plan, ctx.agent.as_ref()),
        )
        .await;

    if let Err(e) = page.close().await {
        warn!("{} 关闭页面失败: {}", item, e);
    }
    browser.disconnect();
    served
}

async fn fast_path(page: &JsExecutor, plan: &FetchPlan) -> Result<JsonValue> {
    let raw = page.eval(plan.script.as_str()).await?;
    (plan.post)(raw)
}

async fn agent_path(page: &JsExecutor, plan: &FetchPlan, agent: &dyn ExtractionAgent) -> Result<JsonValue> {
    let html = page.content().await?;
    let text = html_to_text(&html)?;
    if text.is_empty() {
        bail!("页面没有可读文本");
    }
    agent.extract(&plan.instruction, &text, &plan.schema).await
}

/// 数组结果截断到 `limit` 条
pub(crate) fn apply_limit(value: JsonValue, limit: Option<usize>) -> JsonValue {
    match (value, limit) {
        (JsonValue::Array(mut items), Some(limit)) => {
            items.truncate(limit);
            JsonValue::Array(items)
        }
        (value, _) => value,
    }
}

/// 解析页面里 `JSON.stringify` 过的状态，空串表示页面上没有
pub(crate) fn parse_page_state(raw: JsonValue) -> Result<JsonValue> {
    match raw {
        JsonValue::String(s) if s.is_empty() => bail!("页面上没有初始状态"),
        JsonValue::String(s) => Ok(serde_json::from_str(&s)?),
        JsonValue::Null => bail!("页面上没有初始状态"),
        other => Ok(other),
    }
}
