//! 会话登记 - 会话层
//!
//! ## 职责
//!
//! - 向服务商申请临时会话，可选挂载登录态 Context
//! - 记录每个任务当前存活的会话，任务取消时尽力回收
//! - 会话用完即删，读操作删除时不回写 Context，登录成功后才回写
//!
//! ## 约定
//!
//! - [`Session`] 不可克隆，只属于创建它的任务
//! - 同一 Context 上的并发操作各自拿独立的会话
//! - 每个会话只删除一次：显式 `close`、任务回收、`Drop` 兜底三条路径互斥

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::context::ContextId;
use crate::browser::{self, BrowserAttachment};
use crate::error::{ControlError, ControlResult};
use crate::infrastructure::AutomationProvider;

struct Inner {
    provider: Arc<dyn AutomationProvider>,
    live: Mutex<HashMap<String, HashSet<String>>>,
}

/// 会话登记表
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new(provider: Arc<dyn AutomationProvider>) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                live: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn live(&self) -> MutexGuard<'_, HashMap<String, HashSet<String>>> {
        self.inner
            .live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 确认登录态存在，不存在返回 `ContextNotFound`
    pub async fn require_context(&self, context: &ContextId) -> ControlResult<()> {
        let exists = self
            .inner
            .provider
            .get_context(context.as_str(), false)
            .await
            .map_err(|e| ControlError::SessionCreate(format!("查询登录态失败: {:#}", e)))?;

        if !exists {
            return Err(ControlError::ContextNotFound(context.to_string()));
        }
        Ok(())
    }

    /// 获取登录态，不存在则创建（登录流程使用）
    pub async fn ensure_context(&self, context: &ContextId) -> ControlResult<()> {
        let ok = self
            .inner
            .provider
            .get_context(context.as_str(), true)
            .await
            .map_err(|e| ControlError::SessionCreate(format!("创建登录态失败: {:#}", e)))?;

        if !ok {
            return Err(ControlError::SessionCreate(format!(
                "服务商未能创建登录态 {}",
                context
            )));
        }
        Ok(())
    }

    /// 为任务创建一个新会话
    pub async fn create_session(
        &self,
        task_id: &str,
        context: Option<&ContextId>,
    ) -> ControlResult<Session> {
        let info = self
            .inner
            .provider
            .create_session(context.map(ContextId::as_str))
            .await
            .map_err(|e| {
                warn!(task_id = %task_id, "[会话] 创建失败: {:#}", e);
                ControlError::SessionCreate(format!("{:#}", e))
            })?;

        self.live()
            .entry(task_id.to_string())
            .or_default()
            .insert(info.session_id.clone());

        debug!(
            task_id = %task_id,
            session_id = %info.session_id,
            context = ?context.map(ContextId::as_str),
            "[会话] 已创建"
        );

        Ok(Session {
            id: info.session_id,
            endpoint_url: info.endpoint_url,
            context: context.cloned(),
            task_id: task_id.to_string(),
            registry: self.clone(),
            closed: false,
        })
    }

    /// 任务当前存活的会话数
    pub fn live_count(&self, task_id: &str) -> usize {
        self.live().get(task_id).map(HashSet::len).unwrap_or(0)
    }

    /// 回收任务名下仍存活的会话，不回写 Context
    pub async fn teardown_task(&self, task_id: &str) -> usize {
        let sessions = self.live().remove(task_id).unwrap_or_default();
        let mut deleted = 0;

        for session_id in sessions {
            match self.inner.provider.delete_session(&session_id, false).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(task_id = %task_id, session_id = %session_id, "[会话] 回收失败: {:#}", e),
            }
        }

        if deleted > 0 {
            info!(task_id = %task_id, deleted, "[会话] 🧹 已回收任务遗留的会话");
        }
        deleted
    }

    /// 从登记表移除，返回该会话此前是否仍登记
    fn forget(&self, task_id: &str, session_id: &str) -> bool {
        let mut live = self.live();
        let Some(sessions) = live.get_mut(task_id) else {
            return false;
        };
        let removed = sessions.remove(session_id);
        if sessions.is_empty() {
            live.remove(task_id);
        }
        removed
    }
}

/// 一个临时自动化会话
pub struct Session {
    id: String,
    endpoint_url: String,
    context: Option<ContextId>,
    task_id: String,
    registry: SessionRegistry,
    closed: bool,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn context(&self) -> Option<&ContextId> {
        self.context.as_ref()
    }

    /// 通过 CDP 连接会话里的浏览器
    pub async fn attach(&self) -> ControlResult<BrowserAttachment> {
        browser::attach(&self.endpoint_url)
            .await
            .map_err(|e| ControlError::SessionCreate(format!("连接会话浏览器失败: {:#}", e)))
    }

    /// 让服务商的 AI 在会话里执行指令
    pub async fn agent_act(&self, instruction: &str) -> anyhow::Result<bool> {
        self.registry
            .inner
            .provider
            .agent_act(&self.id, instruction)
            .await
    }

    /// 删除会话，`sync_context` 为 true 时把状态回写到 Context
    pub async fn close(mut self, sync_context: bool) -> ControlResult<()> {
        self.closed = true;

        if !self.registry.forget(&self.task_id, &self.id) {
            debug!(session_id = %self.id, "[会话] 已被任务回收，跳过删除");
            return Ok(());
        }

        self.registry
            .inner
            .provider
            .delete_session(&self.id, sync_context)
            .await
            .map_err(ControlError::Other)?;

        debug!(session_id = %self.id, sync_context, "[会话] 已删除");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed || !self.registry.forget(&self.task_id, &self.id) {
            return;
        }

        let provider = Arc::clone(&self.registry.inner.provider);
        let session_id = std::mem::take(&mut self.id);

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = provider.delete_session(&session_id, false).await {
                        warn!(session_id = %session_id, "[会话] 后台删除失败: {:#}", e);
                    }
                });
            }
            Err(_) => warn!(session_id = %session_id, "[会话] 运行时已关闭，会话未删除"),
        }
    }
}
