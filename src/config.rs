use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, ConfigError};

/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    /// SSO 登录地址
    pub sso_url: String,
    /// FASIH-SM 站点根地址
    pub fasih_base_url: String,
    /// 所有输出文件的根目录（session / wilayah / raw_data / log）
    pub output_dir: PathBuf,
    /// 连接已有浏览器的调试端口，为空时自行启动浏览器
    pub browser_debug_port: Option<u16>,
    /// 浏览器可执行文件路径
    pub chrome_executable: Option<String>,
    /// 是否以无头模式启动
    pub headless: bool,
    /// 等待按钮出现的超时（秒）
    pub element_timeout_secs: u64,
    /// 等待确认弹窗的超时（秒）
    pub confirm_timeout_secs: u64,
    /// 会话探测请求的超时（秒）
    pub probe_timeout_secs: u64,
    /// 单个按钮的最大点击次数
    pub max_click_attempts: u32,
    /// 区域树展开的并发数
    pub region_concurrency: usize,
    /// 已结束任务的保留时间（秒）
    pub task_ttl_secs: u64,
    /// 任务表最多保留的条目
    pub max_tasks: usize,
    /// 确认弹窗按钮的 XPath
    pub confirm_xpath: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 页面操作之间的等待时间
    pub timings: UiTimings,
}

/// 页面操作之间的固定等待
///
/// 身份提供方的页面没有可靠的"加载完成"信号，只能按固定节奏等待。
#[derive(Clone, Debug)]
pub struct UiTimings {
    pub after_login_page: Duration,
    pub after_credentials: Duration,
    pub otp_clear: Duration,
    pub otp_typed: Duration,
    pub after_oauth: Duration,
    pub after_landing: Duration,
    pub cookie_domain: Duration,
    pub session_validate: Duration,
    pub before_click: Duration,
    pub between_confirms: Duration,
    pub poll_interval: Duration,
}

impl Default for UiTimings {
    fn default() -> Self {
        Self {
            after_login_page: Duration::from_secs(2),
            after_credentials: Duration::from_secs(2),
            otp_clear: Duration::from_millis(300),
            otp_typed: Duration::from_millis(500),
            after_oauth: Duration::from_secs(5),
            after_landing: Duration::from_secs(3),
            cookie_domain: Duration::from_secs(1),
            session_validate: Duration::from_secs(4),
            before_click: Duration::from_millis(500),
            between_confirms: Duration::from_millis(500),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl UiTimings {
    /// 不等待（用于测试和已加载的页面）
    pub fn immediate() -> Self {
        Self {
            after_login_page: Duration::ZERO,
            after_credentials: Duration::ZERO,
            otp_clear: Duration::ZERO,
            otp_typed: Duration::ZERO,
            after_oauth: Duration::ZERO,
            after_landing: Duration::ZERO,
            cookie_domain: Duration::ZERO,
            session_validate: Duration::ZERO,
            before_click: Duration::ZERO,
            between_confirms: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sso_url: "https://sso.bps.go.id".to_string(),
            fasih_base_url: "https://fasih-sm.bps.go.id".to_string(),
            output_dir: PathBuf::from("output"),
            browser_debug_port: None,
            chrome_executable: None,
            headless: false,
            element_timeout_secs: 30,
            confirm_timeout_secs: 10,
            probe_timeout_secs: 10,
            max_click_attempts: 5,
            region_concurrency: 4,
            task_ttl_secs: 24 * 60 * 60,
            max_tasks: 256,
            confirm_xpath: r#"//*[@id="fasih"]/div/div/div[6]/button[1]"#.to_string(),
            verbose_logging: false,
            timings: UiTimings::default(),
        }
    }
}

/// TOML 配置文件中可覆盖的字段
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    sso_url: Option<String>,
    fasih_base_url: Option<String>,
    output_dir: Option<PathBuf>,
    browser_debug_port: Option<u16>,
    chrome_executable: Option<String>,
    headless: Option<bool>,
    element_timeout_secs: Option<u64>,
    confirm_timeout_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
    max_click_attempts: Option<u32>,
    region_concurrency: Option<usize>,
    task_ttl_secs: Option<u64>,
    max_tasks: Option<usize>,
    confirm_xpath: Option<String>,
    verbose_logging: Option<bool>,
}

impl Config {
    /// 先读取 TOML 文件（`FASIH_CONFIG`，默认 `fasih.toml`），再用环境变量覆盖
    pub fn load() -> AppResult<Self> {
        let path = std::env::var("FASIH_CONFIG").unwrap_or_else(|_| "fasih.toml".to_string());
        let base = if Path::new(&path).exists() {
            debug!("读取配置文件: {}", path);
            Self::from_toml_file(Path::new(&path))?
        } else {
            Self::default()
        };
        Ok(base.with_env_overrides())
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 解析 TOML 配置，未出现的字段使用默认值
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        let d = Self::default();
        Ok(Self {
            sso_url: file.sso_url.unwrap_or(d.sso_url),
            fasih_base_url: file.fasih_base_url.unwrap_or(d.fasih_base_url),
            output_dir: file.output_dir.unwrap_or(d.output_dir),
            browser_debug_port: file.browser_debug_port.or(d.browser_debug_port),
            chrome_executable: file.chrome_executable.or(d.chrome_executable),
            headless: file.headless.unwrap_or(d.headless),
            element_timeout_secs: file.element_timeout_secs.unwrap_or(d.element_timeout_secs),
            confirm_timeout_secs: file.confirm_timeout_secs.unwrap_or(d.confirm_timeout_secs),
            probe_timeout_secs: file.probe_timeout_secs.unwrap_or(d.probe_timeout_secs),
            max_click_attempts: file.max_click_attempts.unwrap_or(d.max_click_attempts),
            region_concurrency: file.region_concurrency.unwrap_or(d.region_concurrency),
            task_ttl_secs: file.task_ttl_secs.unwrap_or(d.task_ttl_secs),
            max_tasks: file.max_tasks.unwrap_or(d.max_tasks),
            confirm_xpath: file.confirm_xpath.unwrap_or(d.confirm_xpath),
            verbose_logging: file.verbose_logging.unwrap_or(d.verbose_logging),
            timings: d.timings,
        })
    }

    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        Self::from_toml_str(&content)
    }

    fn with_env_overrides(self) -> Self {
        Self {
            sso_url: std::env::var("SSO_URL").unwrap_or(self.sso_url),
            fasih_base_url: std::env::var("FASIH_BASE_URL").unwrap_or(self.fasih_base_url),
            output_dir: std::env::var("OUTPUT_DIR").map(PathBuf::from).unwrap_or(self.output_dir),
            browser_debug_port: env_parse("BROWSER_DEBUG_PORT").or(self.browser_debug_port),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().or(self.chrome_executable),
            headless: env_parse("HEADLESS").unwrap_or(self.headless),
            element_timeout_secs: env_parse("ELEMENT_TIMEOUT_SECS").unwrap_or(self.element_timeout_secs),
            confirm_timeout_secs: env_parse("CONFIRM_TIMEOUT_SECS").unwrap_or(self.confirm_timeout_secs),
            probe_timeout_secs: env_parse("PROBE_TIMEOUT_SECS").unwrap_or(self.probe_timeout_secs),
            max_click_attempts: env_parse("MAX_CLICK_ATTEMPTS").unwrap_or(self.max_click_attempts),
            region_concurrency: env_parse("REGION_CONCURRENCY").unwrap_or(self.region_concurrency),
            task_ttl_secs: env_parse("TASK_TTL_SECS").unwrap_or(self.task_ttl_secs),
            max_tasks: env_parse("MAX_TASKS").unwrap_or(self.max_tasks),
            confirm_xpath: std::env::var("CONFIRM_XPATH").unwrap_or(self.confirm_xpath),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(self.verbose_logging),
            timings: self.timings,
        }
    }

    /// 校验会导致运行期死循环或除零的取值
    pub fn validate(&self) -> AppResult<()> {
        if self.max_click_attempts == 0 {
            return Err(AppError::Config(ConfigError::InvalidValue {
                field: "max_click_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            }));
        }
        if self.region_concurrency == 0 {
            return Err(AppError::Config(ConfigError::InvalidValue {
                field: "region_concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            }));
        }
        Ok(())
    }

    // ========== 派生地址 ==========

    pub fn oauth_url(&self) -> String {
        format!("{}/oauth2/authorization/ics", self.fasih_base_url)
    }

    pub fn landing_url(&self) -> String {
        format!("{}/survey-collection/survey", self.fasih_base_url)
    }

    pub fn survey_api(&self) -> String {
        format!("{}/survey/api/v1", self.fasih_base_url)
    }

    pub fn region_api(&self) -> String {
        format!("{}/region/api/v1", self.fasih_base_url)
    }

    pub fn assignment_api(&self) -> String {
        format!("{}/assignment-general/api", self.fasih_base_url)
    }

    pub fn sso_host(&self) -> String {
        host_of(&self.sso_url)
    }

    pub fn app_host(&self) -> String {
        host_of(&self.fasih_base_url)
    }

    /// SSO 与应用共享的上级域名，例如 `bps.go.id`
    pub fn parent_domain(&self) -> String {
        let host = self.app_host();
        let parts: Vec<&str> = host.split('.').collect();
        if parts.len() > 3 {
            parts[parts.len() - 3..].join(".")
        } else {
            host
        }
    }

    // ========== 输出目录 ==========

    pub fn session_dir(&self) -> PathBuf {
        self.output_dir.join("session")
    }

    pub fn wilayah_dir(&self) -> PathBuf {
        self.output_dir.join("wilayah")
    }

    pub fn raw_data_dir(&self) -> PathBuf {
        self.output_dir.join("raw_data")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.output_dir.join("log")
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("环境变量 {} 的值 '{}' 无法解析，使用默认值", name, raw);
            None
        }
    }
}

fn host_of(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    without_scheme
        .split(['/', ':'])
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_hosts() {
        let config = Config::default();
        assert_eq!(config.sso_host(), "sso.bps.go.id");
        assert_eq!(config.app_host(), "fasih-sm.bps.go.id");
        assert_eq!(config.parent_domain(), "bps.go.id");
        assert_eq!(
            config.landing_url(),
            "https://fasih-sm.bps.go.id/survey-collection/survey"
        );
    }

    #[test]
    fn test_toml_overrides_only_given_fields() {
        let config = Config::from_toml_str(
            r#"
            output_dir = "/tmp/fasih"
            max_click_attempts = 3
            headless = true
            "#,
        )
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/tmp/fasih"));
        assert_eq!(config.max_click_attempts, 3);
        assert!(config.headless);
        assert_eq!(config.element_timeout_secs, 30);
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/fasih/log"));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = Config {
            max_click_attempts: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
