//! Chrome 驱动 - 基础设施层
//!
//! 持有唯一的 Browser / Page 资源，只暴露 `UiDriver` 能力

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    Bounds, GetWindowForTargetParams, SetWindowBoundsParams, WindowState,
};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::element::Element;
use chromiumoxide::{Browser, Page};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::browser;
use crate::config::Config;
use crate::infrastructure::ui_driver::{DriverFactory, Locator, UiDriver, UiError};
use crate::models::session::SavedCookie;

/// 存活探测的超时
const ALIVE_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Chrome 驱动
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 元素状态通过 eval() 在页面内判断
/// - 点击走 CDP 的真实鼠标事件
pub struct ChromeDriver {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromeDriver {
    pub fn new(browser: Browser, page: Page, handler: JoinHandle<()>) -> Self {
        Self {
            browser: Mutex::new(Some(browser)),
            page,
            handler,
        }
    }

    /// 执行 JS 代码并返回 JSON 结果
    async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue, UiError> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result
            .into_value()
            .map_err(|e| UiError::Protocol(e.to_string()))?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T, UiError> {
        let json_value = self.eval(js_code).await?;
        serde_json::from_value(json_value).map_err(|e| UiError::Protocol(e.to_string()))
    }

    /// 在页面内判断元素状态：missing / hidden / disabled / covered / ok
    async fn probe(&self, locator: &Locator) -> Result<String, UiError> {
        let script = format!(
            r#"
            (() => {{
                const el = {};
                if (!el) return "missing";
                el.scrollIntoView({{ block: "center", inline: "center" }});
                const rect = el.getBoundingClientRect();
                if (rect.width === 0 || rect.height === 0) return "hidden";
                if (el.disabled) return "disabled";
                const x = rect.left + rect.width / 2;
                const y = rect.top + rect.height / 2;
                const top = document.elementFromPoint(x, y);
                if (top && top !== el && !el.contains(top)) return "covered";
                return "ok";
            }})()
            "#,
            js_resolve(locator)
        );
        self.eval_as(script).await
    }

    async fn element(&self, locator: &Locator) -> Result<Element, UiError> {
        let found = match locator {
            Locator::XPath(xpath) => self.page.find_xpath(xpath.as_str()).await,
            other => self.page.find_element(css_selector(other)).await,
        };
        found.map_err(|e| match UiError::from(e) {
            UiError::Protocol(_) => UiError::NotFound(locator.to_string()),
            other => other,
        })
    }
}

#[async_trait]
impl UiDriver for ChromeDriver {
    async fn is_alive(&self) -> bool {
        let probe = self.page.evaluate("window.location.href");
        matches!(
            tokio::time::timeout(ALIVE_PROBE_TIMEOUT, probe).await,
            Ok(Ok(_))
        )
    }

    async fn navigate(&self, url: &str) -> Result<(), UiError> {
        debug!("导航到: {}", url);
        self.page.goto(url).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, UiError> {
        self.eval_as("window.location.href").await
    }

    async fn exists(&self, locator: &Locator) -> Result<bool, UiError> {
        let script = format!("(() => {{ return !!({}); }})()", js_resolve(locator));
        self.eval_as(script).await
    }

    async fn is_clickable(&self, locator: &Locator) -> Result<bool, UiError> {
        Ok(self.probe(locator).await? == "ok")
    }

    async fn click(&self, locator: &Locator) -> Result<(), UiError> {
        match self.probe(locator).await?.as_str() {
            "missing" => return Err(UiError::Stale(locator.to_string())),
            "covered" => return Err(UiError::Intercepted(locator.to_string())),
            "hidden" | "disabled" => return Err(UiError::NotInteractable(locator.to_string())),
            _ => {}
        }
        let element = match self.element(locator).await {
            Ok(el) => el,
            Err(UiError::NotFound(_)) => return Err(UiError::Stale(locator.to_string())),
            Err(e) => return Err(e),
        };
        element.click().await?;
        Ok(())
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), UiError> {
        let element = self.element(locator).await?;
        element.click().await?;
        element.type_str(text).await?;
        Ok(())
    }

    async fn clear(&self, locator: &Locator) -> Result<(), UiError> {
        let script = format!(
            r#"
            (() => {{
                const el = {};
                if (!el) return false;
                el.value = "";
                el.dispatchEvent(new Event("input", {{ bubbles: true }}));
                return true;
            }})()
            "#,
            js_resolve(locator)
        );
        if self.eval_as::<bool>(script).await? {
            Ok(())
        } else {
            Err(UiError::NotFound(locator.to_string()))
        }
    }

    async fn value(&self, locator: &Locator) -> Result<String, UiError> {
        let script = format!(
            "(() => {{ const el = {}; return el ? String(el.value ?? \"\") : null; }})()",
            js_resolve(locator)
        );
        let value: Option<String> = self.eval_as(script).await?;
        value.ok_or_else(|| UiError::NotFound(locator.to_string()))
    }

    async fn cookies(&self) -> Result<Vec<SavedCookie>, UiError> {
        let cookies = self.page.get_cookies().await?;
        Ok(cookies
            .into_iter()
            .map(|c| SavedCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
            })
            .collect())
    }

    async fn add_cookie(&self, cookie: &SavedCookie) -> Result<(), UiError> {
        let mut param = CookieParam::new(cookie.name.clone(), cookie.value.clone());
        param.domain = Some(cookie.domain.clone());
        param.path = Some(cookie.path.clone());
        param.secure = Some(cookie.secure);
        self.page.set_cookie(param).await?;
        Ok(())
    }

    async fn minimize(&self) -> Result<(), UiError> {
        let window = self
            .page
            .execute(GetWindowForTargetParams::default())
            .await?;
        let mut bounds = Bounds::default();
        bounds.window_state = Some(WindowState::Minimized);
        self.page
            .execute(SetWindowBoundsParams::new(window.result.window_id.clone(), bounds))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), UiError> {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                warn!("关闭浏览器失败: {}", e);
            }
        }
        self.handler.abort();
        Ok(())
    }
}

/// 按配置启动或连接浏览器
pub struct ChromeLauncher {
    config: Config,
}

impl ChromeLauncher {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl DriverFactory for ChromeLauncher {
    async fn open(&self) -> Result<Arc<dyn UiDriver>, UiError> {
        let (browser, page, handler) = match self.config.browser_debug_port {
            Some(port) => browser::connect_browser(port).await,
            None => browser::launch_browser(&self.config).await,
        }
        .map_err(|e| UiError::Protocol(e.to_string()))?;
        Ok(Arc::new(ChromeDriver::new(browser, page, handler)))
    }
}

/// 生成在页面内定位元素的 JS 表达式
fn js_resolve(locator: &Locator) -> String {
    match locator {
        Locator::Id(id) => format!("document.getElementById({})", js_string(id)),
        Locator::Name(name) => format!("document.getElementsByName({})[0]", js_string(name)),
        Locator::XPath(xpath) => format!(
            "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            js_string(xpath)
        ),
    }
}

fn js_string(raw: &str) -> String {
    serde_json::to_string(raw).unwrap_or_else(|_| "\"\"".to_string())
}

fn css_selector(locator: &Locator) -> String {
    match locator {
        Locator::Id(id) => format!("[id={}]", js_string(id)),
        Locator::Name(name) => format!("[name={}]", js_string(name)),
        Locator::XPath(xpath) => xpath.clone(),
    }
}
