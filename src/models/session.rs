use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 浏览器 Cookie 的可持久化形式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCookie {
    pub name: String,
    pub value: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_secure")]
    pub secure: bool,
}

fn default_domain() -> String {
    ".bps.go.id".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_secure() -> bool {
    true
}

/// 已登录的会话
///
/// 要么 cookies + headers + 登录态齐全，要么整体不存在。
/// 注意：密码以明文保存，并不安全；会话恢复时需要用它重放登录。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub cookies: Vec<SavedCookie>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing)]
    pub is_logged_in: bool,
    #[serde(default)]
    pub saved_at: Option<DateTime<Local>>,
}

impl Session {
    /// 按名称查找 Cookie 的值
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// 生成 `Cookie` 请求头，只包含域名匹配 `host` 的 Cookie
    pub fn cookie_header_for(&self, host: &str) -> String {
        self.cookies
            .iter()
            .filter(|c| domain_matches(&c.domain, host))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Cookie 域是否适用于给定主机（`.bps.go.id` 匹配 `fasih-sm.bps.go.id`）
pub fn domain_matches(cookie_domain: &str, host: &str) -> bool {
    let domain = cookie_domain.trim_start_matches('.');
    !domain.is_empty() && (host == domain || host.ends_with(&format!(".{}", domain)))
}

/// 本地保存的凭据概况
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SavedCredentials {
    pub exists: bool,
    pub password: String,
    pub saved_at: Option<String>,
}
