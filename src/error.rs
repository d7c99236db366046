use std::fmt;

use crate::infrastructure::UiError;

/// 应用程序错误类型
#[derive(Debug)]
pub enum AppError {
    /// 登录 / OTP 相关错误
    Auth(AuthError),
    /// 交互会话丢失
    Session(SessionError),
    /// 页面自动化错误
    Ui(UiError),
    /// 读接口调用错误
    Api(ApiError),
    /// 文件操作错误
    File(FileError),
    /// 配置错误
    Config(ConfigError),
    /// 任务被取消
    Cancelled,
    /// 其他错误（用于包装第三方库错误）
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Auth(e) => write!(f, "Auth error: {}", e),
            AppError::Session(e) => write!(f, "Session error: {}", e),
            AppError::Ui(e) => write!(f, "UI error: {}", e),
            AppError::Api(e) => write!(f, "API error: {}", e),
            AppError::File(e) => write!(f, "File error: {}", e),
            AppError::Config(e) => write!(f, "Config error: {}", e),
            AppError::Cancelled => write!(f, "Task cancelled"),
            AppError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Auth(e) => Some(e),
            AppError::Session(e) => Some(e),
            AppError::Ui(e) => Some(e),
            AppError::Api(e) => Some(e),
            AppError::File(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::Cancelled | AppError::Other(_) => None,
        }
    }
}

/// 登录相关错误
#[derive(Debug)]
pub enum AuthError {
    /// 当前没有可用的登录态
    NotLoggedIn,
    /// 没有进行中的登录（OTP 提交时）
    NoLoginInProgress,
    /// 保存的会话已过期，被重定向回登录页
    SessionExpired,
    /// 缺少用户名或密码
    MissingCredentials,
    /// 登录页面流程失败
    LoginFailed { reason: String },
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::NotLoggedIn => write!(f, "Not logged in"),
            AuthError::NoLoginInProgress => write!(f, "No login waiting for an OTP"),
            AuthError::SessionExpired => write!(f, "Session expired, redirected to login"),
            AuthError::MissingCredentials => write!(f, "Username and password required"),
            AuthError::LoginFailed { reason } => write!(f, "Login failed: {}", reason),
        }
    }
}

impl std::error::Error for AuthError {}

/// 交互会话错误
#[derive(Debug)]
pub enum SessionError {
    /// 浏览器窗口已关闭
    Dead,
    /// 会话丢失且无法恢复，需要重新登录
    RecoveryFailed,
    /// 重试点击期间浏览器被关闭且恢复失败
    ClosedDuringRetry,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Dead => write!(f, "Browser window is closed"),
            SessionError::RecoveryFailed => write!(
                f,
                "Browser window closed and recovery failed. Please login again."
            ),
            SessionError::ClosedDuringRetry => write!(
                f,
                "Browser closed during click retry and recovery failed. Please login again."
            ),
        }
    }
}

impl std::error::Error for SessionError {}

/// 读接口调用错误
#[derive(Debug)]
pub enum ApiError {
    /// 网络请求失败
    RequestFailed {
        endpoint: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 非 2xx 响应
    BadStatus { endpoint: String, status: u16 },
    /// 响应结构不符合预期
    UnexpectedPayload { endpoint: String, detail: String },
    /// 区域元数据声明的层级不在 3..=6
    InvalidRegionDepth { group_id: String, depth: usize },
    /// JSON 解析失败
    JsonParseFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::RequestFailed { endpoint, source } => {
                write!(f, "request to {} failed: {}", endpoint, source)
            }
            ApiError::BadStatus { endpoint, status } => {
                write!(f, "{} returned HTTP {}", endpoint, status)
            }
            ApiError::UnexpectedPayload { endpoint, detail } => {
                write!(f, "unexpected payload from {}: {}", endpoint, detail)
            }
            ApiError::InvalidRegionDepth { group_id, depth } => {
                write!(
                    f,
                    "region group {} declares {} levels, expected 3 to 6",
                    group_id, depth
                )
            }
            ApiError::JsonParseFailed { source } => write!(f, "JSON parse failed: {}", source),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::RequestFailed { source, .. } | ApiError::JsonParseFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 文件操作错误
#[derive(Debug)]
pub enum FileError {
    /// 读取文件失败
    ReadFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 写入文件失败
    WriteFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// TOML 解析失败
    TomlParseFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::ReadFailed { path, source } => write!(f, "read {} failed: {}", path, source),
            FileError::WriteFailed { path, source } => {
                write!(f, "write {} failed: {}", path, source)
            }
            FileError::TomlParseFailed { source } => write!(f, "TOML parse failed: {}", source),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileError::ReadFailed { source, .. }
            | FileError::WriteFailed { source, .. }
            | FileError::TomlParseFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
        }
    }
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 必填项缺失
    Missing { field: String },
    /// 取值非法
    InvalidValue { field: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing { field } => write!(f, "{} required", field),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "invalid value for {}: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ========== 从常见错误类型转换 ==========

impl From<UiError> for AppError {
    fn from(err: UiError) -> Self {
        AppError::Ui(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        AppError::Session(err)
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        AppError::Api(err)
    }
}

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Ui(UiError::from(err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        AppError::Api(ApiError::RequestFailed {
            endpoint,
            source: Box::new(err),
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Api(ApiError::JsonParseFailed {
            source: Box::new(err),
        })
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::File(FileError::TomlParseFailed {
            source: Box::new(err),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建API请求失败错误
    pub fn api_request_failed(
        endpoint: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Api(ApiError::RequestFailed {
            endpoint: endpoint.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 是否应中止整个批量任务（而不是只记录在单条 assignment 上）
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Session(_) | AppError::Auth(_) | AppError::Cancelled
        )
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
