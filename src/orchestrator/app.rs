//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **组装**：创建凭据存储、会话控制器、读接口客户端、区域解析器、流程与执行器
//! 2. **登录**：先尝试恢复保存的会话，再走完整 SSO 登录，成功后回写凭据
//! 3. **任务**：把下载 / 审批任务交给执行器，提供进度查询与取消
//! 4. **资源管理**：唯一持有会话控制器的模块

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::clients::{FasihApi, FasihClient};
use crate::config::Config;
use crate::error::{AppError, AppResult, AuthError, ConfigError};
use crate::infrastructure::{ChromeLauncher, DriverFactory};
use crate::models::action::ActionType;
use crate::models::region::{CacheStatus, WilayahCache};
use crate::models::session::{SavedCredentials, Session};
use crate::models::task::TaskProgress;
use crate::orchestrator::task_executor::{TaskExecutor, TaskId};
use crate::utils::logging;
use crate::services::{
    ActionDispatcher, ArtifactInfo, ArtifactWriter, ColumnListing, CredentialStore, LoginOutcome,
    LoginState, RegionResolver, SessionController,
};
use crate::workflow::{BulkFlow, RunRequest};

/// 登录状态概况
#[derive(Debug, Clone, Serialize)]
pub struct LoginStatus {
    pub state: LoginState,
    pub username: Option<String>,
}

/// 应用主结构
pub struct App {
    config: Config,
    credentials: Arc<CredentialStore>,
    session: Arc<SessionController>,
    api: Arc<dyn FasihApi>,
    regions: Arc<RegionResolver>,
    artifacts: Arc<ArtifactWriter>,
    flow: Arc<BulkFlow>,
    executor: TaskExecutor,
}

impl App {
    /// 使用真实浏览器和 HTTP 客户端初始化
    pub fn initialize(config: Config) -> AppResult<Self> {
        config.validate()?;
        let factory: Arc<dyn DriverFactory> = Arc::new(ChromeLauncher::new(&config));
        let client_config = config.clone();
        Self::with_components(config, factory, move |session| {
            Ok(Arc::new(FasihClient::new(&client_config, session)?) as Arc<dyn FasihApi>)
        })
    }

    /// 指定浏览器工厂和读接口实现（读接口拿到会话快照的订阅端）
    pub fn with_components<F>(
        config: Config,
        factory: Arc<dyn DriverFactory>,
        make_api: F,
    ) -> AppResult<Self>
    where
        F: FnOnce(watch::Receiver<Option<Session>>) -> AppResult<Arc<dyn FasihApi>>,
    {
        let credentials = Arc::new(CredentialStore::new(config.session_dir()));
        let session = Arc::new(SessionController::new(&config, factory));
        let api = make_api(session.subscribe())?;
        let regions = Arc::new(RegionResolver::new(&config, api.clone()));
        let artifacts = Arc::new(ArtifactWriter::new(&config));
        let dispatcher = Arc::new(ActionDispatcher::new(&config, session.clone()));
        let flow = Arc::new(BulkFlow::new(
            &config,
            api.clone(),
            regions.clone(),
            dispatcher,
            session.clone(),
            credentials.clone(),
            artifacts.clone(),
        ));
        let executor = TaskExecutor::new(&config);

        Ok(Self {
            config,
            credentials,
            session,
            api,
            regions,
            artifacts,
            flow,
            executor,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 只读接口，用于列出调查、周期与区域
    pub fn api(&self) -> Arc<dyn FasihApi> {
        self.api.clone()
    }

    // ========== 登录 ==========

    pub fn check_credentials(&self, username: &str) -> SavedCredentials {
        self.credentials.has_saved_credentials(username)
    }

    /// 登录：优先恢复保存的会话，失败后走完整 SSO 登录
    pub async fn login(&self, username: &str, password: &str) -> AppResult<LoginOutcome> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials.into());
        }

        if let Some(mut saved) = self.credentials.load(username) {
            saved.password = password.to_string();
            match self.session.inject_session(&saved).await {
                Ok(()) if self.probe_restored().await => {
                    self.persist_session().await;
                    return Ok(LoginOutcome::Authenticated { restored: true });
                }
                Ok(()) => {
                    info!("保存的会话被读接口拒绝，改为完整登录");
                    self.session.close().await;
                }
                Err(e) => info!("保存的会话不可用，改为完整登录: {}", e),
            }
        }

        let outcome = self.session.start_login(username, password).await?;
        if let LoginOutcome::Authenticated { .. } = outcome {
            self.persist_session().await;
        }
        Ok(outcome)
    }

    pub async fn submit_otp(&self, code: &str) -> AppResult<LoginOutcome> {
        let outcome = self.session.submit_otp(code.trim()).await?;
        if let LoginOutcome::Authenticated { .. } = outcome {
            self.persist_session().await;
        }
        Ok(outcome)
    }

    pub async fn clear_otp(&self) -> AppResult<()> {
        self.session.clear_otp().await
    }

    /// 关闭浏览器并清空内存中的会话；磁盘上的凭据保留
    pub async fn logout(&self) {
        self.session.close().await;
        info!("👋 已退出登录");
    }

    pub async fn status(&self) -> LoginStatus {
        let state = self.session.state().await;
        let username = self.session.current_session().await.map(|s| s.username);
        LoginStatus { state, username }
    }

    /// 恢复的会话必须能访问读接口
    async fn probe_restored(&self) -> bool {
        match self.api.probe_session().await {
            Ok(valid) => valid,
            Err(e) => {
                warn!("⚠️ 会话探测出错: {}", e);
                false
            }
        }
    }

    async fn persist_session(&self) {
        if let Some(session) = self.session.current_session().await {
            if let Err(e) = self.credentials.save(
                &session.username,
                &session.password,
                &session.cookies,
                &session.headers,
            ) {
                warn!("⚠️ 保存会话失败: {}", e);
            }
        }
    }

    // ========== 区域缓存 ==========

    pub async fn fetch_wilayah(
        &self,
        survey_id: &str,
        period_id: &str,
        kab_id: &str,
        group_id: &str,
    ) -> AppResult<WilayahCache> {
        self.regions
            .fetch_and_cache(survey_id, period_id, kab_id, group_id)
            .await
    }

    pub fn wilayah_status(&self, survey_id: &str, period_id: &str, kab_id: &str) -> CacheStatus {
        self.regions.cache_status(survey_id, period_id, kab_id)
    }

    // ========== 后台任务 ==========

    /// 启动原始数据下载任务
    pub fn start_download(&self, req: RunRequest, selected_columns: Vec<String>) -> AppResult<TaskId> {
        check_request(&req)?;
        let flow = self.flow.clone();
        let label = req.clone();
        let id = self.executor.submit("download", move |handle, cancel| async move {
            flow.run_download(&req, &selected_columns, &handle, &cancel)
                .await
        });
        logging::log_run_start("download", &label, &id);
        Ok(id)
    }

    /// 启动批量审批 / 撤回 / 驳回任务
    pub fn start_action(&self, req: RunRequest, action: ActionType) -> AppResult<TaskId> {
        check_request(&req)?;
        let flow = self.flow.clone();
        let label = req.clone();
        let id = self.executor.submit(action.as_str(), move |handle, cancel| async move {
            flow.run_action(&req, action, &handle, &cancel).await
        });
        logging::log_run_start(action.as_str(), &label, &id);
        Ok(id)
    }

    pub fn progress(&self, task_id: &str) -> Option<TaskProgress> {
        self.executor.get_progress(task_id)
    }

    pub fn cancel(&self, task_id: &str) -> bool {
        self.executor.cancel(task_id)
    }

    pub fn list_artifacts(&self) -> AppResult<Vec<ArtifactInfo>> {
        self.artifacts.list_artifacts()
    }

    pub fn artifact_columns(&self, filename: &str) -> AppResult<Vec<String>> {
        self.artifacts.artifact_columns(filename)
    }

    /// 列选择器的候选列：该调查最近一次下载的表头，没有时使用默认列
    pub fn survey_columns(&self, survey_name: &str) -> AppResult<ColumnListing> {
        self.artifacts.survey_columns(survey_name)
    }

    /// 从已有的原始数据表导出选中的列，不重新抓取
    pub fn export_filtered(&self, filename: &str, selected_columns: &[String]) -> AppResult<String> {
        self.artifacts.export_filtered(filename, selected_columns)
    }
}

fn check_request(req: &RunRequest) -> AppResult<()> {
    match req.missing_field() {
        Some(field) => Err(AppError::Config(ConfigError::Missing {
            field: field.to_string(),
        })),
        None => Ok(()),
    }
}
