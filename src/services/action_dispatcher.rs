//! 动作分发 - 业务能力层
//!
//! 在审阅页面上点击一个审批按钮，容忍 DOM 重渲染和遮罩层拦截

use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, SessionError};
use crate::infrastructure::{wait_until_clickable, Locator, UiDriver, UiError};
use crate::models::action::ActionOutcome;
use crate::services::session_controller::{SessionController, SessionGuard};

/// 动作分发器
///
/// 职责：
/// - 整个点击过程独占会话（持有 [`SessionGuard`]）
/// - 会话丢失时先恢复，恢复失败返回 `SessionError`
/// - 等待超时、非瞬时错误只记为失败结果，不返回 Err
pub struct ActionDispatcher {
    config: Config,
    session: Arc<SessionController>,
}

impl ActionDispatcher {
    pub fn new(config: &Config, session: Arc<SessionController>) -> Self {
        Self {
            config: config.clone(),
            session,
        }
    }

    /// 打开 `url` 并点击 id 为 `action_id` 的按钮
    ///
    /// # 返回
    /// - `Ok(outcome)`：点击成功或失败（失败原因在 `message`）
    /// - `Err(SessionError)`：会话无法恢复，需要重新登录
    /// - `Err(Cancelled)`：重试之间检测到取消
    pub async fn perform_action(
        &self,
        url: &str,
        action_id: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> AppResult<ActionOutcome> {
        let mut guard = self.session.lock().await;

        if !guard.is_alive().await {
            warn!("⚠️ 浏览器窗口已关闭，尝试恢复会话...");
            if !guard.recover().await {
                return Err(SessionError::RecoveryFailed.into());
            }
        }

        match self
            .click_with_retry(&mut guard, url, action_id, max_attempts.max(1), cancel)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(AppError::Ui(e)) => {
                if guard.is_alive().await {
                    Ok(ActionOutcome::failed(e.to_string()))
                } else {
                    Ok(ActionOutcome::failed(
                        "Browser window was closed during operation.",
                    ))
                }
            }
            Err(other) => Err(other),
        }
    }

    async fn click_with_retry(
        &self,
        guard: &mut SessionGuard<'_>,
        url: &str,
        action_id: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> AppResult<ActionOutcome> {
        let control = Locator::id(action_id);
        let mut driver = guard.driver().ok_or(SessionError::Dead)?;

        driver.navigate(url).await?;
        if let Some(failed) = self.wait_for(driver.as_ref(), &control).await? {
            return Ok(failed);
        }

        let mut clicked = false;
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            if !self.config.timings.before_click.is_zero() {
                sleep(self.config.timings.before_click).await;
            }

            match driver.click(&control).await {
                Ok(()) => {
                    clicked = true;
                    break;
                }
                Err(e) if e.is_transient() => {
                    debug!(
                        "点击 {} 第 {}/{} 次失败: {}",
                        action_id, attempt, max_attempts, e
                    );
                    if attempt == max_attempts {
                        break;
                    }
                    if !guard.is_alive().await {
                        warn!("⚠️ 重试期间浏览器被关闭，尝试恢复...");
                        if !guard.recover().await {
                            return Err(SessionError::ClosedDuringRetry.into());
                        }
                        driver = guard.driver().ok_or(SessionError::Dead)?;
                        driver.navigate(url).await?;
                    }
                    if let Some(failed) = self.wait_for(driver.as_ref(), &control).await? {
                        return Ok(failed);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !clicked {
            return Ok(ActionOutcome::failed(format!(
                "Failed to click {} after {} attempts",
                action_id, max_attempts
            )));
        }

        self.confirm_dialogs(driver.as_ref()).await;
        info!("✓ {} 点击成功", action_id);
        Ok(ActionOutcome::success(format!(
            "{} clicked successfully",
            action_id
        )))
    }

    /// 等待按钮可点击；超时转成失败结果，其他错误向上传递
    async fn wait_for(
        &self,
        driver: &dyn UiDriver,
        control: &Locator,
    ) -> AppResult<Option<ActionOutcome>> {
        match wait_until_clickable(
            driver,
            control,
            self.config.element_timeout(),
            self.config.timings.poll_interval,
        )
        .await
        {
            Ok(()) => Ok(None),
            Err(e @ UiError::Timeout { .. }) => {
                warn!("⏱️ {}", e);
                Ok(Some(ActionOutcome::failed(e.to_string())))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 最多处理两个确认弹窗；弹窗不出现不算错误
    async fn confirm_dialogs(&self, driver: &dyn UiDriver) {
        let confirm = Locator::xpath(self.config.confirm_xpath.as_str());
        for n in 1..=2 {
            if n > 1 && !self.config.timings.between_confirms.is_zero() {
                sleep(self.config.timings.between_confirms).await;
            }
            if wait_until_clickable(
                driver,
                &confirm,
                self.config.confirm_timeout(),
                self.config.timings.poll_interval,
            )
            .await
            .is_err()
            {
                debug!("没有第 {} 个确认弹窗", n);
                return;
            }
            if let Err(e) = driver.click(&confirm).await {
                debug!("点击第 {} 个确认弹窗失败: {}", n, e);
                return;
            }
        }
    }
}
