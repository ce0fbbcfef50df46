//! 连接器层（Connectors）
//!
//! ## 职责
//!
//! 按平台把操作路由到具体实现。每个平台实现同一个 [`Connector`] 接口，
//! 并用 [`Connector::supports`] 声明自己支持哪些操作；调用未支持的操作
//! 返回 `UnsupportedOperation`，不会落到默认实现之外的任何地方。
//!
//! ## 平台
//!
//! | 平台 | 支持的操作 |
//! |------|-----------|
//! | `xiaohongshu` | 全部六个 |
//! | `wechat` | `extract_summary` `get_details` |
//! | `generic` | `extract_summary` `get_details` |

mod fetch;
pub mod generic;
pub mod platform;
pub mod scripts;
pub mod wechat;
pub mod xiaohongshu;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

pub use generic::GenericConnector;
pub use platform::{Operation, Platform};
pub use wechat::WechatConnector;
pub use xiaohongshu::XiaohongshuConnector;

use crate::error::{ControlError, ControlResult};
use crate::orchestrator::BatchParams;
use crate::services::ExtractionAgent;
use crate::session::{Account, ContextId, SessionRegistry};
use crate::workflow::{ExecutionPath, HybridExecutor, ItemCtx, Served};

fn default_search_limit() -> usize {
    20
}

/// 发布内容类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    Image,
    Video,
}

/// 一次操作请求
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum OperationRequest {
    ExtractSummary {
        urls: Vec<String>,
    },
    GetDetails {
        urls: Vec<String>,
    },
    HarvestUserContent {
        creator_ids: Vec<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
    SearchAndExtract {
        keywords: Vec<String>,
        #[serde(default = "default_search_limit")]
        limit: usize,
        #[serde(default)]
        user_id: Option<String>,
    },
    Publish {
        content: String,
        #[serde(default)]
        content_type: ContentType,
        #[serde(default)]
        images: Vec<String>,
        #[serde(default)]
        tags: Vec<String>,
    },
    Login {
        cookies: HashMap<String, String>,
    },
}

impl OperationRequest {
    pub fn operation(&self) -> Operation {
        match self {
            OperationRequest::ExtractSummary { .. } => Operation::ExtractSummary,
            OperationRequest::GetDetails { .. } => Operation::GetDetails,
            OperationRequest::HarvestUserContent { .. } => Operation::HarvestUserContent,
            OperationRequest::SearchAndExtract { .. } => Operation::SearchAndExtract,
            OperationRequest::Publish { .. } => Operation::Publish,
            OperationRequest::Login { .. } => Operation::Login,
        }
    }
}

/// 单个条目的结果
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub key: String,
    pub success: bool,
    pub path: Option<ExecutionPath>,
    pub data: JsonValue,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
}

impl ItemReport {
    pub fn served(key: impl Into<String>, served: Served<JsonValue>) -> Self {
        Self {
            key: key.into(),
            success: true,
            path: Some(served.path),
            data: served.value,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(key: impl Into<String>, error: &ControlError) -> Self {
        Self {
            key: key.into(),
            success: false,
            path: None,
            data: JsonValue::Null,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }

    /// 执行成功但业务上没有达成（如 cookie 失效导致登录失败）
    pub fn rejected(
        key: impl Into<String>,
        path: ExecutionPath,
        message: impl Into<String>,
        kind: &'static str,
    ) -> Self {
        Self {
            key: key.into(),
            success: false,
            path: Some(path),
            data: JsonValue::Null,
            error: Some(message.into()),
            error_kind: Some(kind),
        }
    }

    pub fn from_result(key: impl Into<String>, result: ControlResult<Served<JsonValue>>) -> Self {
        match result {
            Ok(served) => Self::served(key, served),
            Err(e) => Self::failed(key, &e),
        }
    }
}

/// 连接器执行一次操作所需的一切
#[derive(Clone)]
pub struct OperationContext {
    pub task_id: String,
    pub account: Account,
    pub platform: Platform,
    pub sessions: SessionRegistry,
    pub hybrid: Arc<HybridExecutor>,
    pub agent: Arc<dyn ExtractionAgent>,
    pub batch: BatchParams,
}

impl OperationContext {
    /// 当前账号在当前平台上的登录态
    pub fn context_id(&self) -> ContextId {
        ContextId::for_account(self.platform, &self.account)
    }

    pub fn item(&self, operation: Operation, index: usize, key: &str) -> ItemCtx {
        ItemCtx::new(self.task_id.clone(), self.platform, operation, index, key)
    }
}

/// 平台连接器
///
/// 默认实现全部返回 `UnsupportedOperation`，平台只覆盖自己支持的操作
#[async_trait]
pub trait Connector: Send + Sync {
    fn platform(&self) -> Platform;

    /// 能力声明
    fn supports(&self, operation: Operation) -> bool;

    async fn extract_summary(&self, _ctx: &OperationContext, _urls: Vec<String>) -> ControlResult<Vec<ItemReport>> {
        Err(ControlError::unsupported(self.platform(), Operation::ExtractSummary))
    }

    async fn get_details(&self, _ctx: &OperationContext, _urls: Vec<String>) -> ControlResult<Vec<ItemReport>> {
        Err(ControlError::unsupported(self.platform(), Operation::GetDetails))
    }

    async fn harvest_user_content(
        &self,
        _ctx: &OperationContext,
        _creator_ids: Vec<String>,
        _limit: Option<usize>,
    ) -> ControlResult<Vec<ItemReport>> {
        Err(ControlError::unsupported(self.platform(), Operation::HarvestUserContent))
    }

    async fn search_and_extract(
        &self,
        _ctx: &OperationContext,
        _keywords: Vec<String>,
        _limit: usize,
        _user_id: Option<String>,
    ) -> ControlResult<Vec<ItemReport>> {
        Err(ControlError::unsupported(self.platform(), Operation::SearchAndExtract))
    }

    async fn publish(
        &self,
        _ctx: &OperationContext,
        _content: String,
        _content_type: ContentType,
        _images: Vec<String>,
        _tags: Vec<String>,
    ) -> ControlResult<ItemReport> {
        Err(ControlError::unsupported(self.platform(), Operation::Publish))
    }

    async fn login(&self, _ctx: &OperationContext, _cookies: HashMap<String, String>) -> ControlResult<ItemReport> {
        Err(ControlError::unsupported(self.platform(), Operation::Login))
    }
}

/// 把请求路由到连接器的对应操作
pub async fn dispatch(
    connector: &dyn Connector,
    ctx: &OperationContext,
    request: OperationRequest,
) -> ControlResult<Vec<ItemReport>> {
    let operation = request.operation();
    if !connector.supports(operation) {
        return Err(ControlError::unsupported(connector.platform(), operation));
    }

    info!(task_id = %ctx.task_id, "[连接器] {} 执行 {}", connector.platform(), operation);

    match request {
        OperationRequest::ExtractSummary { urls } => connector.extract_summary(ctx, urls).await,
        OperationRequest::GetDetails { urls } => connector.get_details(ctx, urls).await,
        OperationRequest::HarvestUserContent { creator_ids, limit } => {
            connector.harvest_user_content(ctx, creator_ids, limit).await
        }
        OperationRequest::SearchAndExtract {
            keywords,
            limit,
            user_id,
        } => connector.search_and_extract(ctx, keywords, limit, user_id).await,
        OperationRequest::Publish {
            content,
            content_type,
            images,
            tags,
        } => Ok(vec![
            connector
                .publish(ctx, content, content_type, images, tags)
                .await?,
        ]),
        OperationRequest::Login { cookies } => Ok(vec![connector.login(ctx, cookies).await?]),
    }
}

/// 平台 → 连接器
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<Platform, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置平台
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(XiaohongshuConnector));
        registry.register(Arc::new(WechatConnector));
        registry.register(Arc::new(GenericConnector));
        registry
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.platform(), connector);
    }

    pub fn resolve(&self, platform: Platform) -> ControlResult<Arc<dyn Connector>> {
        self.connectors
            .get(&platform)
            .cloned()
            .ok_or_else(|| ControlError::UnknownPlatform(platform.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_per_platform() {
        let registry = ConnectorRegistry::with_defaults();

        let xhs = registry.resolve(Platform::Xiaohongshu).unwrap();
        assert!(Operation::ALL.iter().all(|op| xhs.supports(*op)));

        for platform in [Platform::Wechat, Platform::Generic] {
            let connector = registry.resolve(platform).unwrap();
            assert!(connector.supports(Operation::ExtractSummary));
            assert!(connector.supports(Operation::GetDetails));
            assert!(!connector.supports(Operation::Publish));
            assert!(!connector.supports(Operation::Login));
            assert!(!connector.supports(Operation::HarvestUserContent));
            assert!(!connector.supports(Operation::SearchAndExtract));
        }
    }

    #[test]
    fn test_empty_registry_reports_unknown_platform() {
        let registry = ConnectorRegistry::new();
        assert!(matches!(
            registry.resolve(Platform::Wechat),
            Err(ControlError::UnknownPlatform(_))
        ));
    }

    #[test]
    fn test_request_from_toml() {
        let request: OperationRequest = toml::from_str(
            r#"
            operation = "search_and_extract"
            keywords = ["露营", "咖啡"]
            "#,
        )
        .unwrap();
        match request {
            OperationRequest::SearchAndExtract { keywords, limit, user_id } => {
                assert_eq!(keywords.len(), 2);
                assert_eq!(limit, 20);
                assert!(user_id.is_none());
            }
            other => panic!("解析结果不对: {:?}", other),
        }
    }

    #[test]
    fn test_report_carries_error_kind() {
        let err = ControlError::ContextNotFound("xiaohongshu-context:crm:u1".into());
        let report = ItemReport::failed("https://www.xiaohongshu.com/explore/1", &err);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "context_not_found");
        assert!(json["path"].is_null());
    }
}
