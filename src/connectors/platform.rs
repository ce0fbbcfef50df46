//! 平台与操作标识
//!
//! 两者都是封闭枚举，字符串形式与锁 key、频率限制表、任务文件中的写法一致。

use phf::phf_map;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ControlError;

/// 域名 → 平台
static PLATFORM_HOSTS: phf::Map<&'static str, Platform> = phf_map! {
    "xiaohongshu.com" => Platform::Xiaohongshu,
    "xhslink.com" => Platform::Xiaohongshu,
    "mp.weixin.qq.com" => Platform::Wechat,
};

/// 平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Xiaohongshu,
    Wechat,
    Generic,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Xiaohongshu, Platform::Wechat, Platform::Generic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Xiaohongshu => "xiaohongshu",
            Platform::Wechat => "wechat",
            Platform::Generic => "generic",
        }
    }

    /// 根据 URL 判断平台，识别不了的归为通用
    pub fn detect(url: &str) -> Platform {
        let host = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));

        let Some(host) = host else {
            return Platform::Generic;
        };

        // 从完整域名开始逐级去掉子域名查表
        let mut candidate = host.as_str();
        loop {
            if let Some(platform) = PLATFORM_HOSTS.get(candidate) {
                return *platform;
            }
            match candidate.split_once('.') {
                Some((_, rest)) if rest.contains('.') => candidate = rest,
                _ => return Platform::Generic,
            }
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ControlError::UnknownPlatform(s.to_string()))
    }
}

/// 连接器操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ExtractSummary,
    GetDetails,
    HarvestUserContent,
    SearchAndExtract,
    Publish,
    Login,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::ExtractSummary,
        Operation::GetDetails,
        Operation::HarvestUserContent,
        Operation::SearchAndExtract,
        Operation::Publish,
        Operation::Login,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ExtractSummary => "extract_summary",
            Operation::GetDetails => "get_details",
            Operation::HarvestUserContent => "harvest_user_content",
            Operation::SearchAndExtract => "search_and_extract",
            Operation::Publish => "publish",
            Operation::Login => "login",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ControlError::Config(format!("未知的操作: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_platform_from_url() {
        assert_eq!(
            Platform::detect("https://www.xiaohongshu.com/explore/65a1b2c3"),
            Platform::Xiaohongshu
        );
        assert_eq!(Platform::detect("http://xhslink.com/a/AbCd"), Platform::Xiaohongshu);
        assert_eq!(
            Platform::detect("https://mp.weixin.qq.com/s/abcdef"),
            Platform::Wechat
        );
        // 只有公众号文章域名属于微信
        assert_eq!(Platform::detect("https://weixin.qq.com/"), Platform::Generic);
        assert_eq!(Platform::detect("https://example.com/post/1"), Platform::Generic);
        assert_eq!(Platform::detect("not a url"), Platform::Generic);
    }

    #[test]
    fn test_string_forms_roundtrip() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        for op in Operation::ALL {
            assert_eq!(op.to_string().parse::<Operation>().unwrap(), op);
        }
        assert!(matches!(
            "douyin".parse::<Platform>(),
            Err(ControlError::UnknownPlatform(_))
        ));
    }
}
