use anyhow::{Context, Result};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::Browser;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error};

use crate::infrastructure::JsExecutor;

/// 通过 CDP 挂到远端会话上的浏览器
pub struct BrowserAttachment {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// 连接到会话的 CDP 端点
pub async fn attach(endpoint_url: &str) -> Result<BrowserAttachment> {
    debug!("正在连接会话浏览器: {}", endpoint_url);

    let (browser, mut handler) = Browser::connect(endpoint_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        e
    })?;

    // 在后台处理浏览器事件
    let handler = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 添加短暂延迟以等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    Ok(BrowserAttachment { browser, handler })
}

impl BrowserAttachment {
    /// 新建页面并导航，返回持有该页面的执行器
    pub async fn open(&self, url: &str) -> Result<JsExecutor> {
        let page = self.browser.new_page("about:blank").await.map_err(|e| {
            error!("创建新页面失败: {}", e);
            e
        })?;
        let executor = JsExecutor::new(page);
        executor.goto(url).await?;
        debug!("页面导航成功: {}", url);
        Ok(executor)
    }

    /// 向浏览器写入 cookie
    pub async fn set_cookies(&self, cookies: Vec<CookieParam>) -> Result<()> {
        let page = self.browser.new_page("about:blank").await?;
        page.set_cookies(cookies).await.context("写入 cookie 失败")?;
        page.close().await?;
        Ok(())
    }

    /// 断开 CDP 连接
    ///
    /// 远端浏览器归服务商所有，随会话删除一起回收，这里不发送 `Browser.close`
    pub fn disconnect(self) {
        self.handler.abort();
        drop(self.browser);
    }
}
