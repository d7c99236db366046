//! 审批资格规则
//!
//! 每个 (动作, 角色) 对应一组"当前状态必须是其中之一"的状态表。
//! 表中没有的组合一律不符合资格，不视为错误。

use crate::models::action::ActionType;

/// 状态中出现这些标记时，跳过原因写作 "already processed"
///
/// 这是对状态文本的子串匹配，可能误判恰好包含这些词的其他状态。
pub const PROCESSED_MARKERS: [&str; 4] = ["APPROVED", "COMPLETED", "REJECTED", "REVOKED"];

/// 撤回 / 驳回时 Pengawas 要求的存在状态
pub const NOT_FOUND_PRESENCE: &str = "3. Tidak Ditemukan";

/// 需要检查存在状态的角色
pub const PRESENCE_ROLE: &str = "Pengawas";

/// 某个动作与角色允许的当前状态
pub fn allowed_statuses(action: ActionType, role: &str) -> &'static [&'static str] {
    match (action, role) {
        (ActionType::Approve, "Pengawas") => &["SUBMITTED BY Pencacah"],
        (ActionType::Approve, "PML") => &["SUBMITTED BY PPL"],
        (ActionType::Approve, "Admin Kabupaten") => &[
            "APPROVED BY Pengawas",
            "APPROVED BY PML",
            "EDITED BY Admin Kabupaten",
        ],
        (ActionType::Approve, "Admin Provinsi") => &["COMPLETED BY Admin Kabupaten"],
        (ActionType::Revoke, "Pengawas") => &["COMPLETED BY Pengawas"],
        (ActionType::Reject, "Pengawas") => &["SUBMITTED BY Pencacah"],
        _ => &[],
    }
}

/// 是否还需要检查详情中的存在状态
pub fn requires_presence_check(action: ActionType, role: &str) -> bool {
    matches!(action, ActionType::Revoke | ActionType::Reject) && role == PRESENCE_ROLE
}

/// 状态检查的结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// 跳过，附带写入审计日志的原因
    Skip(String),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// 根据当前状态判断资格（不含存在状态）
pub fn check_status(action: ActionType, role: &str, status: &str) -> Eligibility {
    let allowed = allowed_statuses(action, role);
    if allowed.is_empty() {
        return Eligibility::Skip(format!(
            "Skipped (not eligible: role {} has no {} statuses)",
            role, action
        ));
    }
    if allowed.contains(&status) {
        return Eligibility::Eligible;
    }

    let upper = status.to_uppercase();
    if PROCESSED_MARKERS.iter().any(|m| upper.contains(m)) {
        Eligibility::Skip("Skipped (already processed)".to_string())
    } else {
        Eligibility::Skip(format!("Skipped (status not eligible: {})", status))
    }
}

/// 撤回 / 驳回时的存在状态规则
pub fn check_presence(presence: Option<&str>) -> Eligibility {
    match presence {
        Some(NOT_FOUND_PRESENCE) => Eligibility::Eligible,
        other => Eligibility::Skip(format!(
            "Skipped (status_keberadaan: {})",
            other.unwrap_or("None")
        )),
    }
}
