#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use connector_plane::connectors::{Connector, ItemReport, Operation, OperationContext, Platform};
use connector_plane::infrastructure::{AutomationProvider, SessionInfo};
use connector_plane::{run_batched, ControlResult, ExtractionAgent};

/// 记录所有调用的服务商替身
#[derive(Default)]
pub struct FakeProvider {
    contexts: Mutex<HashSet<String>>,
    created: AtomicUsize,
    deleted: Mutex<Vec<(String, bool)>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_context(self: Arc<Self>, context_id: &str) -> Arc<Self> {
        self.contexts.lock().unwrap().insert(context_id.to_string());
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<(String, bool)> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl AutomationProvider for FakeProvider {
    async fn get_context(&self, context_id: &str, create: bool) -> Result<bool> {
        let mut contexts = self.contexts.lock().unwrap();
        if contexts.contains(context_id) {
            return Ok(true);
        }
        if create {
            contexts.insert(context_id.to_string());
            return Ok(true);
        }
        Ok(false)
    }

    async fn create_session(&self, _context_id: Option<&str>) -> Result<SessionInfo> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionInfo {
            session_id: format!("sess-{}", n),
            endpoint_url: format!("ws://127.0.0.1:9/devtools/browser/{}", n),
        })
    }

    async fn delete_session(&self, session_id: &str, sync_context: bool) -> Result<()> {
        self.deleted
            .lock()
            .unwrap()
            .push((session_id.to_string(), sync_context));
        Ok(())
    }

    async fn agent_act(&self, _session_id: &str, _instruction: &str) -> Result<bool> {
        Ok(true)
    }
}

/// 原样返回指令的抽取替身
pub struct EchoAgent;

#[async_trait]
impl ExtractionAgent for EchoAgent {
    async fn extract(&self, instruction: &str, page_text: &str, _schema: &JsonValue) -> Result<JsonValue> {
        Ok(json!({ "instruction": instruction, "text": page_text }))
    }
}

/// 不开浏览器的测试连接器，占用 `Platform::Generic`
///
/// URL 中含 `agent` 的条目快速路径失败，含 `broken` 的两条路径都失败。
/// 设置了 `gate` 时，每个条目在会话里等待放行后才返回。
#[derive(Default)]
pub struct StubConnector {
    pub gate: Option<Arc<Notify>>,
    pub entered: Arc<AtomicUsize>,
}

#[async_trait]
impl Connector for StubConnector {
    fn platform(&self) -> Platform {
        Platform::Generic
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(operation, Operation::ExtractSummary)
    }

    async fn extract_summary(&self, ctx: &OperationContext, urls: Vec<String>) -> ControlResult<Vec<ItemReport>> {
        let results = run_batched(urls.clone(), ctx.batch, |index, url| {
            let ctx = ctx.clone();
            let gate = self.gate.clone();
            let entered = Arc::clone(&self.entered);
            async move {
                let item = ctx.item(Operation::ExtractSummary, index, &url);
                let session = ctx.sessions.create_session(&ctx.task_id, None).await?;
                entered.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = gate {
                    gate.notified().await;
                }

                let fast_url = url.clone();
                let served = ctx
                    .hybrid
                    .execute(
                        &item,
                        || async move {
                            if fast_url.contains("agent") || fast_url.contains("broken") {
                                Err(anyhow!("页面结构变化"))
                            } else {
                                Ok(json!({ "url": fast_url }))
                            }
                        },
                        || async {
                            if url.contains("broken") {
                                Err(anyhow!("抽取失败"))
                            } else {
                                ctx.agent.extract("summary", &url, &JsonValue::Null).await
                            }
                        },
                    )
                    .await;

                session.close(false).await?;
                served
            }
        })
        .await;

        Ok(urls
            .into_iter()
            .zip(results)
            .map(|(url, result)| ItemReport::from_result(url, result))
            .collect())
    }
}
