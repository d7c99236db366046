//! 凭据存储 - 业务能力层
//!
//! 每个用户一个 JSON 文件：`<output>/session/session_{key}.json`
//!
//! 注意：密码以明文落盘，用于会话失效后自动重新登录；
//! 它并不安全，部署时应确保输出目录只有操作员可读。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, ConfigError};
use crate::models::session::{SavedCookie, SavedCredentials, Session};

/// 凭据存储
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("session_{}.json", key))
    }

    /// 覆盖写入该用户的会话文件
    pub fn save(
        &self,
        username: &str,
        password: &str,
        cookies: &[SavedCookie],
        headers: &BTreeMap<String, String>,
    ) -> AppResult<PathBuf> {
        let key = normalize_username(username).ok_or_else(|| {
            AppError::Config(ConfigError::Missing {
                field: "username".to_string(),
            })
        })?;

        let session = Session {
            username: username.trim().to_string(),
            password: password.to_string(),
            cookies: cookies.to_vec(),
            headers: headers.clone(),
            is_logged_in: true,
            saved_at: Some(Local::now()),
        };

        fs::create_dir_all(&self.dir)
            .map_err(|e| AppError::file_write_failed(self.dir.display().to_string(), e))?;
        let path = self.path_for(&key);
        let content = serde_json::to_string_pretty(&session)?;
        fs::write(&path, content)
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        info!("💾 会话已保存: {}", path.display());
        Ok(path)
    }

    /// 读取保存的会话，文件不存在、内容损坏或没有 Cookie 时返回 None
    pub fn load(&self, username: &str) -> Option<Session> {
        let key = normalize_username(username)?;
        let path = self.path_for(&key);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => {
                debug!("没有保存的会话: {}", path.display());
                return None;
            }
        };

        match serde_json::from_str::<Session>(&content) {
            Ok(session) if session.cookies.is_empty() => {
                warn!("⚠️ 会话文件没有 Cookie，忽略 {}", path.display());
                None
            }
            Ok(mut session) => {
                session.is_logged_in = true;
                Some(session)
            }
            Err(e) => {
                warn!("⚠️ 会话文件损坏，忽略 {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn has_saved_credentials(&self, username: &str) -> SavedCredentials {
        match self.load(username) {
            Some(session) => SavedCredentials {
                exists: true,
                password: session.password,
                saved_at: session.saved_at.map(|t| t.to_rfc3339()),
            },
            None => SavedCredentials::default(),
        }
    }
}

/// 文件名使用的用户键：去空白、小写、截掉第一个 `@` 之后的部分
pub fn normalize_username(username: &str) -> Option<String> {
    let lowered = username.trim().to_lowercase();
    let key = lowered.split('@').next().unwrap_or_default().trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}
