use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 批量审批动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Approve,
    Revoke,
    Reject,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Approve => "approve",
            ActionType::Revoke => "revoke",
            ActionType::Reject => "reject",
        }
    }

    /// 首字母大写，用于日志文件名
    pub fn title(self) -> &'static str {
        match self {
            ActionType::Approve => "Approve",
            ActionType::Revoke => "Revoke",
            ActionType::Reject => "Reject",
        }
    }

    /// 审阅页面上对应按钮的元素 id
    pub fn control_id(self) -> &'static str {
        match self {
            ActionType::Approve => "buttonApprove",
            ActionType::Revoke => "buttonRevoke",
            ActionType::Reject => "buttonReject",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "approve" => Ok(ActionType::Approve),
            "revoke" => Ok(ActionType::Revoke),
            "reject" => Ok(ActionType::Reject),
            other => Err(format!("unknown action type: {}", other)),
        }
    }
}

/// 单条任务单的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResult {
    Success,
    Failed,
    Skipped,
    Error,
}

/// 审计日志中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub assignment_id: String,
    pub smallcode: String,
    pub status: String,
    pub action: ActionType,
    pub result: ActionResult,
    pub message: String,
}

/// 一次点击动作的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_ids() {
        assert_eq!(ActionType::Approve.control_id(), "buttonApprove");
        assert_eq!(ActionType::Revoke.control_id(), "buttonRevoke");
        assert_eq!(ActionType::Reject.control_id(), "buttonReject");
    }

    #[test]
    fn test_parse_action_type() {
        assert_eq!("Approve".parse::<ActionType>(), Ok(ActionType::Approve));
        assert!("delete".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_result_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ActionResult::Skipped).unwrap(),
            "\"skipped\""
        );
    }
}
