//! 会话控制 - 业务能力层
//!
//! 管理唯一的交互式浏览器上下文：登录（含 OTP）、会话注入、存活检测与恢复。
//!
//! 所有会修改上下文的操作都在同一把 `tokio::sync::Mutex` 下执行；
//! 动作分发器在整个 `perform_action` 期间持有同一个 [`SessionGuard`]，
//! 保证并发任务不会交错导航。
//!
//! 只读查询（状态、存活、当前会话）读取每次状态变化时发布的 `watch` 快照，
//! 不等待这把锁。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, AuthError};
use crate::infrastructure::{DriverFactory, Locator, UiDriver, UiError};
use crate::models::session::{SavedCookie, Session};

const XSRF_COOKIE: &str = "XSRF-TOKEN";

/// 登录状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    NoSession,
    AwaitingCredentials,
    AwaitingOtp,
    Authenticated,
    /// 已登录但浏览器上下文不可用
    Dead,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoginState::NoSession => "no session",
            LoginState::AwaitingCredentials => "awaiting credentials",
            LoginState::AwaitingOtp => "awaiting OTP",
            LoginState::Authenticated => "authenticated",
            LoginState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// 登录步骤的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// 已登录；`restored` 表示来自保存的会话
    Authenticated { restored: bool },
    /// 身份提供方要求 OTP
    NeedsOtp,
    /// OTP 输入框没有接收到输入（通常被密码管理器弹窗遮挡），需要 `clear_otp` 后重试
    OtpBlocked,
    /// OTP 错误，仍在等待 OTP
    WrongOtp,
}

impl LoginOutcome {
    /// 面向操作员的提示
    pub fn message(&self) -> &'static str {
        match self {
            LoginOutcome::Authenticated { restored: true } => "Session restored",
            LoginOutcome::Authenticated { restored: false } => "Login successful",
            LoginOutcome::NeedsOtp => "OTP required",
            LoginOutcome::OtpBlocked => {
                "OTP input is blocked. Close the browser's password prompt, then retry."
            }
            LoginOutcome::WrongOtp => "Wrong OTP. Please try again.",
        }
    }
}

/// 受锁保护的会话状态
pub struct ControllerState {
    driver: Option<Arc<dyn UiDriver>>,
    login: LoginState,
    username: Option<String>,
    password: Option<String>,
    cookies: Vec<SavedCookie>,
    headers: BTreeMap<String, String>,
}

impl ControllerState {
    fn empty() -> Self {
        Self {
            driver: None,
            login: LoginState::NoSession,
            username: None,
            password: None,
            cookies: Vec::new(),
            headers: BTreeMap::new(),
        }
    }
}

/// 每次状态变化后发布的登录状态与上下文句柄
#[derive(Clone)]
struct Presence {
    login: LoginState,
    driver: Option<Arc<dyn UiDriver>>,
}

/// 会话控制器
///
/// 职责：
/// - 持有唯一的交互式上下文
/// - 驱动 SSO 登录与 OTP 流程
/// - 把登录得到的 Cookie / 请求头发布给读接口客户端
pub struct SessionController {
    config: Config,
    factory: Arc<dyn DriverFactory>,
    state: Mutex<ControllerState>,
    snapshot: watch::Sender<Option<Session>>,
    presence: watch::Sender<Presence>,
}

impl SessionController {
    pub fn new(config: &Config, factory: Arc<dyn DriverFactory>) -> Self {
        let (snapshot, _) = watch::channel(None);
        let (presence, _) = watch::channel(Presence {
            login: LoginState::NoSession,
            driver: None,
        });
        Self {
            config: config.clone(),
            factory,
            state: Mutex::new(ControllerState::empty()),
            snapshot,
            presence,
        }
    }

    /// 订阅已登录会话的快照（未登录时为 None）
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.snapshot.subscribe()
    }

    /// 独占会话，直到返回的 guard 被释放
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            ctl: self,
            state: self.state.lock().await,
        }
    }

    pub async fn start_login(&self, username: &str, password: &str) -> AppResult<LoginOutcome> {
        self.lock().await.start_login(username, password).await
    }

    pub async fn submit_otp(&self, code: &str) -> AppResult<LoginOutcome> {
        self.lock().await.submit_otp(code).await
    }

    pub async fn clear_otp(&self) -> AppResult<()> {
        self.lock().await.clear_otp().await
    }

    pub async fn inject_session(&self, saved: &Session) -> AppResult<()> {
        self.lock().await.inject_session(saved).await
    }

    pub async fn recover(&self) -> bool {
        self.lock().await.recover().await
    }

    /// 不等待会话锁；动作执行期间也能立即返回
    pub async fn is_alive(&self) -> bool {
        let driver = self.presence.borrow().driver.clone();
        match driver {
            Some(driver) => driver.is_alive().await,
            None => false,
        }
    }

    pub async fn close(&self) {
        self.lock().await.close().await
    }

    pub async fn state(&self) -> LoginState {
        let login = self.presence.borrow().login;
        match login {
            LoginState::Authenticated if !self.is_alive().await => LoginState::Dead,
            other => other,
        }
    }

    /// 当前已登录的会话（包含明文密码，用于回写凭据存储）
    pub async fn current_session(&self) -> Option<Session> {
        self.snapshot.borrow().clone()
    }
}

/// 持有会话锁期间可执行的操作
pub struct SessionGuard<'a> {
    ctl: &'a SessionController,
    state: MutexGuard<'a, ControllerState>,
}

impl SessionGuard<'_> {
    fn config(&self) -> &Config {
        &self.ctl.config
    }

    pub fn driver(&self) -> Option<Arc<dyn UiDriver>> {
        self.state.driver.clone()
    }

    /// 从不返回错误
    pub async fn is_alive(&self) -> bool {
        match &self.state.driver {
            Some(driver) => driver.is_alive().await,
            None => false,
        }
    }

    pub fn current_session(&self) -> Option<Session> {
        if self.state.login != LoginState::Authenticated {
            return None;
        }
        Some(Session {
            username: self.state.username.clone().unwrap_or_default(),
            password: self.state.password.clone().unwrap_or_default(),
            cookies: self.state.cookies.clone(),
            headers: self.state.headers.clone(),
            is_logged_in: true,
            saved_at: None,
        })
    }

    /// 提交用户名和密码；需要 OTP 时停在 `AwaitingOtp`
    pub async fn start_login(&mut self, username: &str, password: &str) -> AppResult<LoginOutcome> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials.into());
        }

        info!("🔐 开始登录: {}", username);
        self.state.username = Some(username.to_string());
        self.state.password = Some(password.to_string());
        self.set_login(LoginState::AwaitingCredentials);

        match self.submit_credentials(username, password).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("❌ 登录失败: {}", e);
                self.teardown().await;
                Err(match e {
                    AppError::Ui(ui) => AuthError::LoginFailed {
                        reason: ui.to_string(),
                    }
                    .into(),
                    other => other,
                })
            }
        }
    }

    async fn submit_credentials(&mut self, username: &str, password: &str) -> AppResult<LoginOutcome> {
        let driver = self.ensure_driver().await?;
        let timings = self.config().timings.clone();

        driver.navigate(&self.config().sso_url).await?;
        settle(timings.after_login_page).await;

        driver.fill(&Locator::name("username"), username).await?;
        driver.fill(&Locator::name("password"), password).await?;
        driver.click(&Locator::id("kc-login")).await?;
        settle(timings.after_credentials).await;

        if driver.exists(&Locator::id("otp")).await? {
            info!("📱 需要 OTP");
            self.set_login(LoginState::AwaitingOtp);
            return Ok(LoginOutcome::NeedsOtp);
        }

        self.finalize(&driver).await?;
        Ok(LoginOutcome::Authenticated { restored: false })
    }

    /// 提交 OTP 并核对输入框确实收到了这段输入
    pub async fn submit_otp(&mut self, code: &str) -> AppResult<LoginOutcome> {
        let driver = match (&self.state.driver, self.state.login) {
            (Some(driver), LoginState::AwaitingOtp) => driver.clone(),
            _ => return Err(AuthError::NoLoginInProgress.into()),
        };
        let timings = self.config().timings.clone();
        let otp = Locator::id("otp");

        driver.clear(&otp).await?;
        settle(timings.otp_clear).await;
        driver.fill(&otp, code).await?;
        settle(timings.otp_typed).await;

        if driver.value(&otp).await? != code {
            warn!("⚠️ OTP 输入框内容与提交值不一致，输入被阻挡");
            return Ok(LoginOutcome::OtpBlocked);
        }

        driver.click(&Locator::id("kc-login")).await?;
        settle(timings.after_credentials).await;

        if driver.exists(&otp).await? {
            warn!("❌ OTP 错误");
            return Ok(LoginOutcome::WrongOtp);
        }

        self.finalize(&driver).await?;
        Ok(LoginOutcome::Authenticated { restored: false })
    }

    pub async fn clear_otp(&mut self) -> AppResult<()> {
        match (&self.state.driver, self.state.login) {
            (Some(driver), LoginState::AwaitingOtp) => {
                driver.clear(&Locator::id("otp")).await?;
                Ok(())
            }
            _ => Err(AuthError::NoLoginInProgress.into()),
        }
    }

    /// 走完 OAuth 跳转，采集 Cookie 并生成请求头
    async fn finalize(&mut self, driver: &Arc<dyn UiDriver>) -> AppResult<()> {
        let timings = self.config().timings.clone();

        driver.navigate(&self.config().oauth_url()).await?;
        settle(timings.after_oauth).await;
        driver.navigate(&self.config().landing_url()).await?;
        settle(timings.after_landing).await;

        let landed = driver.current_url().await?;
        if is_login_url(self.config(), &landed) {
            return Err(AuthError::LoginFailed {
                reason: format!("still on the identity provider after login ({})", landed),
            }
            .into());
        }

        self.capture(driver).await?;
        self.mark_authenticated(driver).await;
        info!("✅ 登录成功: {}", self.state.username.as_deref().unwrap_or_default());
        Ok(())
    }

    /// 重放保存的 Cookie 恢复会话；被重定向回登录页视为会话过期
    pub async fn inject_session(&mut self, saved: &Session) -> AppResult<()> {
        if saved.cookies.is_empty() {
            return Err(AuthError::LoginFailed {
                reason: "No cookies found in session data".to_string(),
            }
            .into());
        }

        match self.replay_cookies(saved).await {
            Ok(()) => {
                info!("♻️ 会话已恢复: {}", saved.username);
                Ok(())
            }
            Err(e) => {
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn replay_cookies(&mut self, saved: &Session) -> AppResult<()> {
        let driver = self.ensure_driver().await?;
        let timings = self.config().timings.clone();
        let (sso_cookies, app_cookies) = partition_cookies(self.config(), &saved.cookies);

        if !sso_cookies.is_empty() {
            driver.navigate(&self.config().sso_url).await?;
            settle(timings.cookie_domain).await;
            add_cookies(driver.as_ref(), &sso_cookies).await;
        }

        driver.navigate(&self.config().fasih_base_url).await?;
        settle(timings.cookie_domain).await;
        add_cookies(driver.as_ref(), &app_cookies).await;

        driver.navigate(&self.config().landing_url()).await?;
        settle(timings.session_validate).await;

        let landed = driver.current_url().await?;
        if is_login_url(self.config(), &landed) {
            warn!("⚠️ 保存的会话已过期，被重定向到: {}", landed);
            return Err(AuthError::SessionExpired.into());
        }

        self.state.username = Some(saved.username.clone());
        self.state.password = Some(saved.password.clone());
        self.capture(&driver).await?;
        self.mark_authenticated(&driver).await;
        Ok(())
    }

    /// 会话丢失后的恢复：先注入最后一次的 Cookie，再用账号密码完整登录
    ///
    /// 需要 OTP 时无法无人值守完成，返回 false。
    pub async fn recover(&mut self) -> bool {
        let username = self.state.username.clone().unwrap_or_default();
        let password = self.state.password.clone().unwrap_or_default();
        let cookies = self.state.cookies.clone();

        if cookies.is_empty() && (username.is_empty() || password.is_empty()) {
            warn!("⚠️ 没有可用于恢复会话的 Cookie 或凭据");
            return false;
        }

        info!("🔄 正在恢复会话: {}", username);
        self.teardown().await;

        if !cookies.is_empty() {
            let saved = Session {
                username: username.clone(),
                password: password.clone(),
                cookies,
                headers: BTreeMap::new(),
                is_logged_in: true,
                saved_at: None,
            };
            match self.inject_session(&saved).await {
                Ok(()) => return true,
                Err(e) => debug!("Cookie 注入失败，改为完整登录: {}", e),
            }
        }

        if username.is_empty() || password.is_empty() {
            return false;
        }
        match self.start_login(&username, &password).await {
            Ok(LoginOutcome::Authenticated { .. }) => true,
            Ok(outcome) => {
                warn!("⚠️ 恢复会话需要人工操作: {}", outcome.message());
                false
            }
            Err(e) => {
                warn!("❌ 恢复会话失败: {}", e);
                false
            }
        }
    }

    /// 关闭上下文并清空所有内存中的会话数据，可重复调用
    pub async fn close(&mut self) {
        self.teardown().await;
        self.state.username = None;
        self.state.password = None;
    }

    /// 关闭上下文，保留账号密码以便恢复
    async fn teardown(&mut self) {
        if let Some(driver) = self.state.driver.take() {
            if let Err(e) = driver.close().await {
                debug!("关闭浏览器上下文失败: {}", e);
            }
        }
        self.set_login(LoginState::NoSession);
        self.state.cookies.clear();
        self.state.headers.clear();
        self.ctl.snapshot.send_replace(None);
    }

    async fn ensure_driver(&mut self) -> AppResult<Arc<dyn UiDriver>> {
        if let Some(driver) = &self.state.driver {
            if driver.is_alive().await {
                return Ok(driver.clone());
            }
            if let Err(e) = driver.close().await {
                warn!("⚠️ 关闭失效的浏览器上下文失败: {}", e);
            }
            self.state.driver = None;
            self.publish();
        }
        debug!("打开新的浏览器上下文");
        let driver = self.ctl.factory.open().await?;
        self.state.driver = Some(driver.clone());
        self.publish();
        Ok(driver)
    }

    fn set_login(&mut self, login: LoginState) {
        self.state.login = login;
        self.publish();
    }

    /// 把登录状态和上下文句柄发布给不持锁的只读查询
    fn publish(&self) {
        self.ctl.presence.send_replace(Presence {
            login: self.state.login,
            driver: self.state.driver.clone(),
        });
    }

    async fn capture(&mut self, driver: &Arc<dyn UiDriver>) -> Result<(), UiError> {
        let cookies = driver.cookies().await?;
        self.state.headers = build_headers(self.config(), &cookies);
        self.state.cookies = cookies;
        Ok(())
    }

    async fn mark_authenticated(&mut self, driver: &Arc<dyn UiDriver>) {
        self.state.login = LoginState::Authenticated;
        self.ctl.snapshot.send_replace(self.current_session());
        self.publish();
        if let Err(e) = driver.minimize().await {
            debug!("最小化窗口失败: {}", e);
        }
    }
}

async fn settle(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay).await;
    }
}

async fn add_cookies(driver: &dyn UiDriver, cookies: &[SavedCookie]) {
    for cookie in cookies {
        if let Err(e) = driver.add_cookie(cookie).await {
            debug!("写入 Cookie {} 失败: {}", cookie.name, e);
        }
    }
}

/// 读接口需要的请求头，`X-XSRF-TOKEN` 取自 URL 解码后的 `XSRF-TOKEN` Cookie
pub fn build_headers(config: &Config, cookies: &[SavedCookie]) -> BTreeMap<String, String> {
    let xsrf = cookies
        .iter()
        .find(|c| c.name == XSRF_COOKIE)
        .map(|c| {
            urlencoding::decode(&c.value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| c.value.clone())
        })
        .unwrap_or_default();
    let base = config.fasih_base_url.trim_end_matches('/');

    let mut headers = BTreeMap::new();
    headers.insert("X-Requested-With".to_string(), "XMLHttpRequest".to_string());
    headers.insert("X-XSRF-TOKEN".to_string(), xsrf);
    headers.insert("Referer".to_string(), format!("{}/", base));
    headers.insert("User-Agent".to_string(), "Mozilla/5.0".to_string());
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.insert(
        "Accept".to_string(),
        "application/json, text/plain, */*".to_string(),
    );
    headers.insert("Origin".to_string(), base.to_string());
    headers
}

/// 按注入顺序拆分 Cookie：身份提供方域名一组，应用域名与共享上级域名一组
pub fn partition_cookies(
    config: &Config,
    cookies: &[SavedCookie],
) -> (Vec<SavedCookie>, Vec<SavedCookie>) {
    let sso_host = config.sso_host();
    let app_host = config.app_host();
    let parent = config.parent_domain();

    let mut sso = Vec::new();
    let mut app = Vec::new();
    for cookie in cookies {
        let domain = cookie.domain.trim_start_matches('.');
        if domain.contains(&sso_host) {
            sso.push(cookie.clone());
        } else if domain.contains(&app_host) || domain == parent {
            app.push(cookie.clone());
        } else {
            debug!("跳过无关域名的 Cookie: {} ({})", cookie.name, cookie.domain);
        }
    }
    (sso, app)
}

/// 是否停留在身份提供方的登录页
pub fn is_login_url(config: &Config, url: &str) -> bool {
    url.contains(&config.sso_host()) || url.to_lowercase().contains("login")
}
