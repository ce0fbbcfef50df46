//! 账号与登录态标识
//!
//! 登录态 ID 由 (平台, 来源, 来源 ID) 直接算出，同一账号总是落到同一个
//! Context 上，不需要额外的映射表。

use std::fmt::Display;

use crate::connectors::Platform;
use crate::error::{ControlError, ControlResult};

/// 校验 key 的组成部分：非空且不含冒号
pub(crate) fn validate_component(field: &'static str, value: &str) -> ControlResult<()> {
    if value.is_empty() || value.contains(':') {
        return Err(ControlError::InvalidIdentifier {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// 终端用户账号
///
/// `source` 是调用方系统，`source_id` 是该系统里的用户
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Account {
    source: String,
    source_id: String,
}

impl Account {
    pub fn new(source: impl Into<String>, source_id: impl Into<String>) -> ControlResult<Self> {
        let source = source.into();
        let source_id = source_id.into();
        validate_component("source", &source)?;
        validate_component("source_id", &source_id)?;
        Ok(Self { source, source_id })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.source_id)
    }
}

/// 持久化登录态 ID：`{platform}-context:{source}:{source_id}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(String);

impl ContextId {
    pub fn for_account(platform: Platform, account: &Account) -> Self {
        Self(format!(
            "{}-context:{}:{}",
            platform, account.source, account.source_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_id_is_deterministic() {
        let account = Account::new("crm", "user-42").unwrap();
        let a = ContextId::for_account(Platform::Xiaohongshu, &account);
        let b = ContextId::for_account(Platform::Xiaohongshu, &account.clone());
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "xiaohongshu-context:crm:user-42");
        assert_ne!(a, ContextId::for_account(Platform::Wechat, &account));
    }

    #[test]
    fn test_account_rejects_colons_and_empty() {
        assert!(matches!(
            Account::new("crm", "a:b"),
            Err(ControlError::InvalidIdentifier { field: "source_id", .. })
        ));
        assert!(Account::new("", "x").is_err());
    }
}
