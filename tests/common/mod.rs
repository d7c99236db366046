#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fasih_review::clients::FasihApi;
use fasih_review::config::{Config, UiTimings};
use fasih_review::error::{ApiError, AppResult};
use fasih_review::infrastructure::{DriverFactory, Locator, UiDriver, UiError};
use fasih_review::models::{Assignment, RegionLevel, RegionNode, SavedCookie, StatusEvent};
use serde_json::{json, Value as JsonValue};

pub const USERNAME: &str = "operator";
pub const PASSWORD: &str = "secret";
pub const VALID_OTP: &str = "123456";
pub const SESSION_VALUE: &str = "valid-session";

/// 快速的测试配置，所有输出写到 `dir`
pub fn test_config(dir: &Path) -> Config {
    Config {
        output_dir: dir.to_path_buf(),
        element_timeout_secs: 1,
        confirm_timeout_secs: 0,
        max_click_attempts: 5,
        region_concurrency: 3,
        timings: UiTimings::immediate(),
        ..Config::default()
    }
}

/// 点击时注入的故障
#[derive(Debug, Clone, Copy)]
pub enum ClickFault {
    Stale,
    Intercepted,
    /// 浏览器在点击时被关闭
    CloseBrowser,
}

/// 模拟的 SSO + FASIH 站点，所有浏览器上下文共享
#[derive(Debug)]
pub struct Site {
    pub require_otp: bool,
    /// OTP 输入框收不到输入
    pub otp_blocked: bool,
    /// 服务端是否仍接受保存的 SESSION Cookie
    pub session_valid: bool,
    pub click_faults: HashMap<String, VecDeque<ClickFault>>,
    /// 永远不可点击的元素
    pub hidden: HashSet<String>,
    /// 点击后出现的确认弹窗数
    pub confirm_dialogs: usize,
    pending_confirms: usize,
    /// 关闭上下文时返回错误
    pub close_fails: bool,
    pub clicks: Vec<String>,
    pub navigations: Vec<String>,
    config: Config,
}

impl Site {
    pub fn new(config: &Config) -> Self {
        Self {
            require_otp: false,
            otp_blocked: false,
            session_valid: true,
            click_faults: HashMap::new(),
            hidden: HashSet::new(),
            confirm_dialogs: 0,
            pending_confirms: 0,
            close_fails: false,
            clicks: Vec::new(),
            navigations: Vec::new(),
            config: config.clone(),
        }
    }

    pub fn fault(&mut self, control: &str, faults: &[ClickFault]) {
        self.click_faults
            .entry(Locator::id(control).to_string())
            .or_default()
            .extend(faults.iter().copied());
    }

    pub fn clicks_on(&self, control: &str) -> usize {
        let key = Locator::id(control).to_string();
        self.clicks.iter().filter(|c| **c == key).count()
    }
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    fields: HashMap<String, String>,
    otp_pending: bool,
    sso_ok: bool,
    authenticated: bool,
}

pub struct FakeDriver {
    site: Arc<Mutex<Site>>,
    alive: AtomicBool,
    page: Mutex<PageState>,
}

impl FakeDriver {
    fn new(site: Arc<Mutex<Site>>) -> Self {
        Self {
            site,
            alive: AtomicBool::new(true),
            page: Mutex::new(PageState::default()),
        }
    }

    /// 模拟用户手动关闭窗口
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn check_alive(&self) -> Result<(), UiError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(UiError::Closed)
        }
    }

    fn login_page(config: &Config) -> String {
        format!("{}/auth/realms/pegawai-bps/login", config.sso_url)
    }
}

#[async_trait]
impl UiDriver for FakeDriver {
    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn navigate(&self, url: &str) -> Result<(), UiError> {
        self.check_alive()?;
        let mut site = self.site.lock().unwrap();
        site.navigations.push(url.to_string());
        let mut page = self.page.lock().unwrap();
        let config = site.config.clone();

        page.url = if url == config.oauth_url() {
            if page.sso_ok {
                page.authenticated = true;
            }
            url.to_string()
        } else if url == config.sso_url {
            Self::login_page(&config)
        } else if url.starts_with(&config.fasih_base_url) && url != config.fasih_base_url {
            if page.authenticated {
                url.to_string()
            } else {
                Self::login_page(&config)
            }
        } else {
            url.to_string()
        };
        Ok(())
    }

    async fn current_url(&self) -> Result<String, UiError> {
        self.check_alive()?;
        Ok(self.page.lock().unwrap().url.clone())
    }

    async fn exists(&self, locator: &Locator) -> Result<bool, UiError> {
        self.check_alive()?;
        if *locator == Locator::id("otp") {
            return Ok(self.page.lock().unwrap().otp_pending);
        }
        Ok(true)
    }

    async fn is_clickable(&self, locator: &Locator) -> Result<bool, UiError> {
        self.check_alive()?;
        let site = self.site.lock().unwrap();
        if site.hidden.contains(&locator.to_string()) {
            return Ok(false);
        }
        if *locator == Locator::xpath(site.config.confirm_xpath.as_str()) {
            return Ok(site.pending_confirms > 0);
        }
        Ok(true)
    }

    async fn click(&self, locator: &Locator) -> Result<(), UiError> {
        self.check_alive()?;
        let key = locator.to_string();
        let mut site = self.site.lock().unwrap();

        let fault = site
            .click_faults
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());
        match fault {
            Some(ClickFault::Stale) => return Err(UiError::Stale(key)),
            Some(ClickFault::Intercepted) => return Err(UiError::Intercepted(key)),
            Some(ClickFault::CloseBrowser) => {
                self.kill();
                return Err(UiError::Stale(key));
            }
            None => {}
        }
        site.clicks.push(key);

        if *locator == Locator::xpath(site.config.confirm_xpath.as_str()) {
            site.pending_confirms = site.pending_confirms.saturating_sub(1);
            return Ok(());
        }

        let mut page = self.page.lock().unwrap();
        if *locator == Locator::id("kc-login") {
            if page.otp_pending {
                let typed = page.fields.get(&Locator::id("otp").to_string()).cloned();
                if typed.as_deref() == Some(VALID_OTP) {
                    page.otp_pending = false;
                    page.sso_ok = true;
                }
            } else {
                let user = page.fields.get(&Locator::name("username").to_string());
                let pass = page.fields.get(&Locator::name("password").to_string());
                if user.map(String::as_str) == Some(USERNAME)
                    && pass.map(String::as_str) == Some(PASSWORD)
                {
                    if site.require_otp {
                        page.otp_pending = true;
                    } else {
                        page.sso_ok = true;
                    }
                }
            }
        } else {
            site.pending_confirms = site.confirm_dialogs;
        }
        Ok(())
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), UiError> {
        self.check_alive()?;
        let blocked = self.site.lock().unwrap().otp_blocked;
        if blocked && *locator == Locator::id("otp") {
            return Ok(());
        }
        self.page
            .lock()
            .unwrap()
            .fields
            .entry(locator.to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn clear(&self, locator: &Locator) -> Result<(), UiError> {
        self.check_alive()?;
        self.page.lock().unwrap().fields.remove(&locator.to_string());
        Ok(())
    }

    async fn value(&self, locator: &Locator) -> Result<String, UiError> {
        self.check_alive()?;
        Ok(self
            .page
            .lock()
            .unwrap()
            .fields
            .get(&locator.to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn cookies(&self) -> Result<Vec<SavedCookie>, UiError> {
        self.check_alive()?;
        if !self.page.lock().unwrap().authenticated {
            return Ok(Vec::new());
        }
        let config = self.site.lock().unwrap().config.clone();
        Ok(vec![
            cookie("KEYCLOAK_SESSION", "kc", &config.sso_host()),
            cookie("SESSION", SESSION_VALUE, &config.app_host()),
            cookie("XSRF-TOKEN", "tok%3D%3D", &config.app_host()),
        ])
    }

    async fn add_cookie(&self, c: &SavedCookie) -> Result<(), UiError> {
        self.check_alive()?;
        let valid = self.site.lock().unwrap().session_valid;
        if valid && c.name == "SESSION" && c.value == SESSION_VALUE {
            self.page.lock().unwrap().authenticated = true;
        }
        Ok(())
    }

    async fn minimize(&self) -> Result<(), UiError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), UiError> {
        self.kill();
        if self.site.lock().unwrap().close_fails {
            return Err(UiError::Closed);
        }
        Ok(())
    }
}

pub fn cookie(name: &str, value: &str, domain: &str) -> SavedCookie {
    SavedCookie {
        name: name.to_string(),
        value: value.to_string(),
        domain: domain.to_string(),
        path: "/".to_string(),
        secure: true,
    }
}

/// 每次 open 都创建一个连接到同一站点的新上下文
pub struct FakeFactory {
    pub site: Arc<Mutex<Site>>,
    opens: AtomicUsize,
    last: Mutex<Option<Arc<FakeDriver>>>,
}

impl FakeFactory {
    pub fn new(config: &Config) -> Arc<Self> {
        Arc::new(Self {
            site: Arc::new(Mutex::new(Site::new(config))),
            opens: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn kill_current(&self) {
        if let Some(driver) = self.last.lock().unwrap().as_ref() {
            driver.kill();
        }
    }

    pub fn with_site<R>(&self, f: impl FnOnce(&mut Site) -> R) -> R {
        f(&mut self.site.lock().unwrap())
    }
}

#[async_trait]
impl DriverFactory for FakeFactory {
    async fn open(&self) -> Result<Arc<dyn UiDriver>, UiError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let driver = Arc::new(FakeDriver::new(self.site.clone()));
        *self.last.lock().unwrap() = Some(driver.clone());
        Ok(driver)
    }
}

/// 内存中的只读接口
///
/// 区域树每层 `fanout` 个子节点，id 为 `{parent}.{i}`。
#[derive(Default)]
pub struct FakeApi {
    pub role: String,
    pub depth: usize,
    pub fanout: usize,
    pub assignments: HashMap<String, Vec<String>>,
    pub histories: HashMap<String, Vec<String>>,
    pub details: HashMap<String, JsonValue>,
    pub failing_history: HashSet<String>,
    pub region_calls: AtomicUsize,
    /// 读接口拒绝当前会话
    pub session_rejected: bool,
}

impl FakeApi {
    pub fn new(role: &str, depth: usize, fanout: usize) -> Self {
        Self {
            role: role.to_string(),
            depth,
            fanout,
            ..Self::default()
        }
    }

    pub fn with_assignment(mut self, smallcode: &str, id: &str, statuses: &[&str]) -> Self {
        self.assignments
            .entry(smallcode.to_string())
            .or_default()
            .push(id.to_string());
        self.histories.insert(
            id.to_string(),
            statuses.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn with_detail(mut self, id: &str, detail: JsonValue) -> Self {
        self.details.insert(id.to_string(), detail);
        self
    }
}

#[async_trait]
impl FasihApi for FakeApi {
    async fn list_surveys(&self, _survey_type: &str, _page_size: usize) -> AppResult<JsonValue> {
        Ok(json!({ "data": [] }))
    }

    async fn survey_detail(&self, _survey_id: &str) -> AppResult<JsonValue> {
        Ok(json!({ "data": {} }))
    }

    async fn user_role(&self, _period_id: &str) -> AppResult<String> {
        Ok(self.role.clone())
    }

    async fn region_metadata(&self, _group_id: &str) -> AppResult<JsonValue> {
        let levels: Vec<JsonValue> = (1..=self.depth).map(|n| json!({ "id": n })).collect();
        Ok(json!({ "data": { "level": levels } }))
    }

    async fn regions(
        &self,
        level: RegionLevel,
        _group_id: &str,
        parent: Option<&str>,
    ) -> AppResult<Vec<RegionNode>> {
        self.region_calls.fetch_add(1, Ordering::SeqCst);
        let parent = parent.unwrap_or("root");
        Ok((1..=self.fanout)
            .map(|i| {
                let id = format!("{}.{}", parent, i);
                RegionNode {
                    id: id.clone(),
                    name: format!("L{} {}", level.number(), i),
                    code: i.to_string(),
                    full_code: id,
                    level: level.number(),
                }
            })
            .collect())
    }

    async fn assignments_by_smallcode(
        &self,
        _period_id: &str,
        smallcode: &str,
    ) -> AppResult<Vec<Assignment>> {
        Ok(self
            .assignments
            .get(smallcode)
            .map(|ids| {
                ids.iter()
                    .map(|id| Assignment {
                        assignment_id: id.clone(),
                        smallcode: smallcode.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn assignment_detail(&self, assignment_id: &str) -> AppResult<JsonValue> {
        Ok(self
            .details
            .get(assignment_id)
            .cloned()
            .unwrap_or_else(|| json!({ "data": {} })))
    }

    async fn assignment_history(&self, assignment_id: &str) -> AppResult<Vec<StatusEvent>> {
        if self.failing_history.contains(assignment_id) {
            return Err(ApiError::BadStatus {
                endpoint: "assignment-history".to_string(),
                status: 500,
            }
            .into());
        }
        Ok(self
            .histories
            .get(assignment_id)
            .map(|statuses| {
                statuses
                    .iter()
                    .enumerate()
                    .map(|(i, s)| StatusEvent {
                        sequence_no: i + 1,
                        assignment_id: Some(assignment_id.to_string()),
                        date: None,
                        status_assignment: s.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn probe_session(&self) -> AppResult<bool> {
        Ok(!self.session_rejected)
    }
}
