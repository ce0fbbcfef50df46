//! JS 执行器 - 基础设施层
//!
//! 持有一个会话里的 page，只暴露"导航 / 执行 JS / 读取页面"的能力

use anyhow::{Context, Result};
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// JS 执行器
///
/// 职责：
/// - 持有 Page 资源
/// - 暴露 eval() 能力（快速路径）
/// - 暴露 content() 能力（Agent 路径的输入）
/// - 不认识平台，不处理业务流程
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 导航到指定 URL 并等待加载
    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("导航到 {} 失败", url))?;
        Ok(())
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 读取当前页面的 HTML
    pub async fn content(&self) -> Result<String> {
        self.page.content().await.context("读取页面内容失败")
    }

    /// 关闭 page
    pub async fn close(self) -> Result<()> {
        self.page.close().await.context("关闭页面失败")
    }
}
