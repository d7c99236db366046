use chrono::{DateTime, Local};
use serde::Serialize;

/// 后台任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_finished(self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// 运行中的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_assignments: usize,
}

/// 可轮询的任务进度
///
/// 只由任务自身写入，外部读取的是快照。`logs` 只追加。
#[derive(Debug, Clone, Serialize)]
pub struct TaskProgress {
    pub kind: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub logs: Vec<String>,
    pub counts: TaskCounts,
    pub output_filename: Option<String>,
    pub columns: Vec<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
}

impl TaskProgress {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            status: TaskStatus::Running,
            progress: 0,
            message: message.into(),
            logs: Vec::new(),
            counts: TaskCounts::default(),
            output_filename: None,
            columns: Vec::new(),
            started_at: Local::now(),
            finished_at: None,
        }
    }
}

/// `floor(100 * done / total)`，`total == 0` 时为 100
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}
