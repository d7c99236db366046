//! 页面自动化抽象 - 基础设施层
//!
//! 只暴露"在一个交互页面上能做什么"，不认识登录流程或审批动作

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

use crate::models::session::SavedCookie;

/// 页面元素定位方式
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Id(String),
    Name(String),
    XPath(String),
}

impl Locator {
    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    pub fn name(name: impl Into<String>) -> Self {
        Locator::Name(name.into())
    }

    pub fn xpath(xpath: impl Into<String>) -> Self {
        Locator::XPath(xpath.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "#{}", id),
            Locator::Name(name) => write!(f, "[name={}]", name),
            Locator::XPath(xpath) => write!(f, "xpath:{}", xpath),
        }
    }
}

/// 页面自动化错误
#[derive(Debug, thiserror::Error)]
pub enum UiError {
    /// 元素在定位之后被重新渲染
    #[error("element {0} went stale")]
    Stale(String),
    /// 点击被遮罩层拦截
    #[error("click on {0} was intercepted")]
    Intercepted(String),
    #[error("element {0} not found")]
    NotFound(String),
    #[error("element {0} is not interactable")]
    NotInteractable(String),
    #[error("timed out after {secs}s waiting for {locator}")]
    Timeout { locator: String, secs: u64 },
    /// 浏览器上下文已关闭
    #[error("browser context is closed")]
    Closed,
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl UiError {
    /// 可以通过重新定位元素后重试的错误
    pub fn is_transient(&self) -> bool {
        matches!(self, UiError::Stale(_) | UiError::Intercepted(_))
    }
}

impl From<chromiumoxide::error::CdpError> for UiError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("no node")
            || lower.contains("does not belong to the document")
            || lower.contains("could not compute box model")
        {
            UiError::Stale(msg)
        } else if lower.contains("channel") || lower.contains("closed") {
            UiError::Closed
        } else {
            UiError::Protocol(msg)
        }
    }
}

/// 单个交互式浏览器上下文
///
/// 职责：
/// - 导航、读写元素、读写 Cookie
/// - 不认识 SSO / OTP / 审批按钮
/// - 不做重试，重试策略由上层决定
#[async_trait]
pub trait UiDriver: Send + Sync {
    /// 上下文是否仍然可用，不允许返回错误
    async fn is_alive(&self) -> bool;

    async fn navigate(&self, url: &str) -> Result<(), UiError>;

    async fn current_url(&self) -> Result<String, UiError>;

    /// 元素是否存在于当前文档
    async fn exists(&self, locator: &Locator) -> Result<bool, UiError>;

    /// 元素是否存在、可见、未禁用且没有被遮挡
    async fn is_clickable(&self, locator: &Locator) -> Result<bool, UiError>;

    async fn click(&self, locator: &Locator) -> Result<(), UiError>;

    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), UiError>;

    async fn clear(&self, locator: &Locator) -> Result<(), UiError>;

    /// 读取输入框当前的 value
    async fn value(&self, locator: &Locator) -> Result<String, UiError>;

    async fn cookies(&self) -> Result<Vec<SavedCookie>, UiError>;

    async fn add_cookie(&self, cookie: &SavedCookie) -> Result<(), UiError>;

    /// 最小化窗口（保持打开）
    async fn minimize(&self) -> Result<(), UiError>;

    async fn close(&self) -> Result<(), UiError>;
}

/// 创建新的浏览器上下文
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn UiDriver>, UiError>;
}

/// 轮询直到元素可点击，超过 `timeout` 返回 `UiError::Timeout`
///
/// 元素暂时不存在或被遮挡都只是继续等待；上下文关闭立即返回。
pub async fn wait_until_clickable(
    driver: &dyn UiDriver,
    locator: &Locator,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), UiError> {
    let poll = async {
        loop {
            match driver.is_clickable(locator).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(UiError::Closed) => return Err(UiError::Closed),
                Err(e) => debug!("等待 {} 时出错，继续轮询: {}", locator, e),
            }
            sleep(poll_interval).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(result) => result,
        Err(_) => Err(UiError::Timeout {
            locator: locator.to_string(),
            secs: timeout.as_secs(),
        }),
    }
}
