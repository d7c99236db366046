//! 批量处理流程 - 流程层
//!
//! 核心职责：定义"一个县/市"的完整批量处理流程
//!
//! 流程顺序：
//! 1. 查询角色
//! 2. 区域解析（缓存优先）
//! 3. 逐个叶子单元列出任务单 → 资格检查 → 点击审批按钮
//! 4. 写审计日志 / 原始数据表，回写凭据

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clients::FasihApi;
use crate::config::Config;
use crate::error::{ApiError, AppError, AppResult, ConfigError};
use crate::models::action::{ActionLogEntry, ActionResult, ActionType};
use crate::models::assignment::{current_status, detail_answers, extract_answers, status_keberadaan, Assignment};
use crate::models::task::{percent, TaskCounts};
use crate::services::{
    column_order, ActionDispatcher, ArtifactWriter, CredentialStore, RegionResolver, SessionController,
};
use crate::workflow::eligibility::{check_presence, check_status, requires_presence_check, Eligibility};
use crate::utils::logging::truncate_text;
use crate::workflow::run_ctx::RunRequest;

/// 审计日志与任务日志中单条错误信息的最大字符数
const MAX_ERROR_CHARS: usize = 200;

/// 一次批量任务的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initializing,
    ResolvingRegions,
    Iterating,
    Finalizing,
    Completed,
    Errored,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Initializing => "初始化",
            RunPhase::ResolvingRegions => "解析区域",
            RunPhase::Iterating => "逐单处理",
            RunPhase::Finalizing => "收尾",
            RunPhase::Completed => "完成",
            RunPhase::Errored => "出错",
        };
        f.write_str(s)
    }
}

/// 进度上报
///
/// 由任务执行器提供，流程层只通过它写进度。
pub trait RunReporter: Send + Sync {
    fn set_progress(&self, percent: u8);
    fn set_message(&self, message: &str);
    /// 追加一行任务日志
    fn log(&self, line: &str);
    fn update_counts(&self, counts: TaskCounts);
}

/// 一次批量任务的结果
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub message: String,
    pub output_filename: Option<String>,
    pub columns: Vec<String>,
    pub counts: TaskCounts,
    pub entries: Vec<ActionLogEntry>,
}

/// 批量处理流程
///
/// - 编排区域解析、资格判断与点击
/// - 单条任务单的错误只记录，不中断
/// - 会话无法恢复、取消、登录错误中断整个任务
pub struct BulkFlow {
    config: Config,
    api: Arc<dyn FasihApi>,
    regions: Arc<RegionResolver>,
    dispatcher: Arc<ActionDispatcher>,
    session: Arc<SessionController>,
    credentials: Arc<CredentialStore>,
    artifacts: Arc<ArtifactWriter>,
}

impl BulkFlow {
    pub fn new(
        config: &Config,
        api: Arc<dyn FasihApi>,
        regions: Arc<RegionResolver>,
        dispatcher: Arc<ActionDispatcher>,
        session: Arc<SessionController>,
        credentials: Arc<CredentialStore>,
        artifacts: Arc<ArtifactWriter>,
    ) -> Self {
        Self {
            config: config.clone(),
            api,
            regions,
            dispatcher,
            session,
            credentials,
            artifacts,
        }
    }

    /// 批量审批 / 撤回 / 驳回
    pub async fn run_action(
        &self,
        req: &RunRequest,
        action: ActionType,
        reporter: &dyn RunReporter,
        cancel: &CancellationToken,
    ) -> AppResult<RunSummary> {
        let result = self.action_phases(req, action, reporter, cancel).await;
        self.finish_phase(req, &result);
        result
    }

    /// 只下载原始数据，不做资格过滤和点击
    pub async fn run_download(
        &self,
        req: &RunRequest,
        selected_columns: &[String],
        reporter: &dyn RunReporter,
        cancel: &CancellationToken,
    ) -> AppResult<RunSummary> {
        let result = self
            .download_phases(req, selected_columns, reporter, cancel)
            .await;
        self.finish_phase(req, &result);
        result
    }

    async fn action_phases(
        &self,
        req: &RunRequest,
        action: ActionType,
        reporter: &dyn RunReporter,
        cancel: &CancellationToken,
    ) -> AppResult<RunSummary> {
        self.enter(req, RunPhase::Initializing);
        validate(req)?;
        let role = self.api.user_role(&req.period_id).await?;
        reporter.log(&format!("👤 Role: {}", role));

        let codes = self.leaf_codes(req, reporter).await?;
        let total = codes.len();
        if total == 0 {
            return Ok(self.empty_action_summary(reporter));
        }

        self.enter(req, RunPhase::Iterating);
        let mut counts = TaskCounts::default();
        let mut entries = Vec::new();

        for (i, code) in codes.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            reporter.set_progress(percent(i, total));
            reporter.set_message(&format!("Processing {}...", code));

            let assignments = self.api.assignments_by_smallcode(&req.period_id, code).await?;
            if assignments.is_empty() {
                continue;
            }
            counts.total_assignments += assignments.len();

            for assignment in &assignments {
                let entry = match self
                    .process_item(req, action, &role, code, assignment, cancel)
                    .await
                {
                    Ok(entry) => entry,
                    Err(e) if e.is_run_fatal() => return Err(e),
                    Err(e) => {
                        warn!("{} ⚠️ {} 处理出错: {}", req, assignment.assignment_id, e);
                        error_entry(assignment, code, action, &e)
                    }
                };

                match entry.result {
                    ActionResult::Success => {
                        counts.success += 1;
                        reporter.log(&format!("✅ {}: {} success", entry.assignment_id, action));
                    }
                    ActionResult::Failed | ActionResult::Error => {
                        counts.failed += 1;
                        reporter.log(&format!("❌ {}: {}", entry.assignment_id, entry.message));
                    }
                    ActionResult::Skipped => counts.skipped += 1,
                }
                reporter.update_counts(counts);
                entries.push(entry);
            }
        }

        self.enter(req, RunPhase::Finalizing);
        reporter.set_progress(100);
        let output_filename = if entries.is_empty() {
            None
        } else {
            let filename = self
                .artifacts
                .write_action_log(action, &req.file_label(), &entries)?;
            reporter.log(&format!("📁 Log saved: {}", filename));
            Some(filename)
        };
        self.write_back_credentials(reporter).await;

        Ok(RunSummary {
            message: format!(
                "Done! Success: {}, Failed: {}, Skipped: {}",
                counts.success, counts.failed, counts.skipped
            ),
            output_filename,
            columns: Vec::new(),
            counts,
            entries,
        })
    }

    /// 单条任务单：状态检查 → 存在状态检查 → 点击
    async fn process_item(
        &self,
        req: &RunRequest,
        action: ActionType,
        role: &str,
        smallcode: &str,
        assignment: &Assignment,
        cancel: &CancellationToken,
    ) -> AppResult<ActionLogEntry> {
        let id = &assignment.assignment_id;
        let history = self.api.assignment_history(id).await?;
        let status = current_status(&history);
        let entry = |result: ActionResult, message: String| ActionLogEntry {
            assignment_id: id.clone(),
            smallcode: smallcode.to_string(),
            status: status.clone(),
            action,
            result,
            message,
        };

        if let Eligibility::Skip(reason) = check_status(action, role, &status) {
            return Ok(entry(ActionResult::Skipped, reason));
        }

        if requires_presence_check(action, role) {
            let detail = self.api.assignment_detail(id).await?;
            let presence = status_keberadaan(&detail);
            if let Eligibility::Skip(reason) = check_presence(presence.as_deref()) {
                return Ok(entry(ActionResult::Skipped, reason));
            }
        }

        let url = req.review_url(&self.config.fasih_base_url, id);
        let outcome = self
            .dispatcher
            .perform_action(&url, action.control_id(), self.config.max_click_attempts, cancel)
            .await?;

        let result = if outcome.success {
            ActionResult::Success
        } else {
            ActionResult::Failed
        };
        Ok(entry(result, outcome.message))
    }

    fn empty_action_summary(&self, reporter: &dyn RunReporter) -> RunSummary {
        reporter.set_progress(100);
        RunSummary {
            message: "Done! Success: 0, Failed: 0, Skipped: 0 (0 leaf units, 0 items)".to_string(),
            ..RunSummary::default()
        }
    }

    async fn download_phases(
        &self,
        req: &RunRequest,
        selected_columns: &[String],
        reporter: &dyn RunReporter,
        cancel: &CancellationToken,
    ) -> AppResult<RunSummary> {
        self.enter(req, RunPhase::Initializing);
        validate(req)?;

        let codes = self.leaf_codes(req, reporter).await?;
        let total = codes.len();

        self.enter(req, RunPhase::Iterating);
        let mut counts = TaskCounts::default();
        let mut rows: Vec<BTreeMap<String, String>> = Vec::new();

        for (i, code) in codes.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            reporter.set_progress(percent(i, total));
            reporter.set_message(&format!("Processing {}...", code));

            let assignments = self.api.assignments_by_smallcode(&req.period_id, code).await?;
            if assignments.is_empty() {
                continue;
            }
            counts.total_assignments += assignments.len();

            for assignment in &assignments {
                match self.collect_row(req, code, assignment).await {
                    Ok(row) => {
                        counts.success += 1;
                        rows.push(row);
                    }
                    Err(e) if e.is_run_fatal() => return Err(e),
                    Err(e) => {
                        counts.failed += 1;
                        reporter.log(&format!(
                            "⚠️ Error {}: {}",
                            assignment.assignment_id,
                            truncate_text(&e.to_string(), MAX_ERROR_CHARS)
                        ));
                    }
                }
            }
            reporter.update_counts(counts);
            reporter.log(&format!("✅ {}: {} assignments", code, assignments.len()));
        }

        self.enter(req, RunPhase::Finalizing);
        reporter.set_progress(100);
        if rows.is_empty() {
            self.write_back_credentials(reporter).await;
            return Ok(RunSummary {
                message: "No data found".to_string(),
                counts,
                ..RunSummary::default()
            });
        }

        let available: Vec<String> = rows
            .iter()
            .flat_map(|r| r.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let columns = if selected_columns.is_empty() {
            column_order::smart_sort_columns(&available)
        } else {
            column_order::select_columns(selected_columns, &available)
        };

        let filename = self
            .artifacts
            .write_raw_data(&req.file_label(), &columns, &rows)?;
        reporter.log(&format!("📁 File saved: {} ({} columns)", filename, columns.len()));
        self.write_back_credentials(reporter).await;

        Ok(RunSummary {
            message: format!("Completed! {} records saved.", rows.len()),
            output_filename: Some(filename),
            columns,
            counts,
            entries: Vec::new(),
        })
    }

    /// 一条任务单的拍平答案 + 固定列
    async fn collect_row(
        &self,
        req: &RunRequest,
        smallcode: &str,
        assignment: &Assignment,
    ) -> AppResult<BTreeMap<String, String>> {
        let id = &assignment.assignment_id;
        let detail = self.api.assignment_detail(id).await?;
        let answers = detail_answers(&detail).map_err(|detail| ApiError::UnexpectedPayload {
            endpoint: "assignment/get-by-id-with-data-for-scm".to_string(),
            detail,
        })?;
        let mut row = extract_answers(&answers);

        let history = self.api.assignment_history(id).await?;
        row.insert("assignment_id".to_string(), id.clone());
        row.insert(
            "link_preview".to_string(),
            req.review_url(&self.config.fasih_base_url, id),
        );
        row.insert("status_assignment".to_string(), current_status(&history));
        row.insert("smallcode".to_string(), smallcode.to_string());
        Ok(row)
    }

    /// 叶子单元：缓存优先，否则在线展开
    async fn leaf_codes(&self, req: &RunRequest, reporter: &dyn RunReporter) -> AppResult<Vec<String>> {
        self.enter(req, RunPhase::ResolvingRegions);
        reporter.set_message("Loading wilayah data...");

        let (codes, from_cache) = self
            .regions
            .smallcodes_for_run(&req.survey_id, &req.period_id, &req.kab_id, &req.group_id)
            .await?;
        if from_cache {
            reporter.log("📁 Using cached wilayah data");
        } else {
            reporter.log("📍 Fetched smallcodes from API");
        }
        reporter.log(&format!("Found {} smallcodes", codes.len()));
        Ok(codes)
    }

    /// 任务结束后把最新的 Cookie 写回凭据存储
    async fn write_back_credentials(&self, reporter: &dyn RunReporter) {
        let Some(session) = self.session.current_session().await else {
            return;
        };
        if session.username.is_empty() {
            return;
        }
        match self.credentials.save(
            &session.username,
            &session.password,
            &session.cookies,
            &session.headers,
        ) {
            Ok(_) => reporter.log("✅ Session updated"),
            Err(e) => warn!("⚠️ 回写会话失败: {}", e),
        }
    }

    fn enter(&self, req: &RunRequest, phase: RunPhase) {
        info!("{} ▶ {}", req, phase);
    }

    fn finish_phase(&self, req: &RunRequest, result: &AppResult<RunSummary>) {
        match result {
            Ok(summary) => info!("{} ✓ {}: {}", req, RunPhase::Completed, summary.message),
            Err(e) => error!("{} ❌ {}: {}", req, RunPhase::Errored, e),
        }
    }
}

/// 单条任务单出错时的审计记录
fn error_entry(
    assignment: &Assignment,
    smallcode: &str,
    action: ActionType,
    err: &AppError,
) -> ActionLogEntry {
    ActionLogEntry {
        assignment_id: assignment.assignment_id.clone(),
        smallcode: smallcode.to_string(),
        status: "ERROR".to_string(),
        action,
        result: ActionResult::Error,
        message: truncate_text(&err.to_string(), MAX_ERROR_CHARS),
    }
}

fn validate(req: &RunRequest) -> AppResult<()> {
    match req.missing_field() {
        Some(field) => Err(AppError::Config(ConfigError::Missing {
            field: field.to_string(),
        })),
        None => Ok(()),
    }
}
