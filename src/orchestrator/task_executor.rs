//! 后台任务执行器 - 编排层
//!
//! 每个提交的任务在独立的 tokio 任务中运行，进度记录可随时轮询。
//! 进度记录在任务启动前就已插入，轮询方不会看到"不存在"的窗口。

use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Local;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppResult;
use crate::models::task::{TaskCounts, TaskProgress, TaskStatus};
use crate::workflow::{RunReporter, RunSummary};

pub type TaskId = String;

struct TaskEntry {
    progress: Arc<RwLock<TaskProgress>>,
    cancel: CancellationToken,
}

/// 任务执行器
///
/// 已结束的任务超过 `task_ttl_secs` 后被清理；总数超过 `max_tasks` 时
/// 先淘汰最早结束的任务。运行中的任务不会被清理。
pub struct TaskExecutor {
    tasks: DashMap<TaskId, TaskEntry>,
    ttl: chrono::Duration,
    max_tasks: usize,
}

impl TaskExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            tasks: DashMap::new(),
            ttl: chrono::Duration::from_std(Duration::from_secs(config.task_ttl_secs))
                .unwrap_or_else(|_| chrono::Duration::days(36_500)),
            max_tasks: config.max_tasks.max(1),
        }
    }

    /// 启动后台任务，立即返回任务 id
    ///
    /// `job` 返回 `Err` 时任务标记为 error；返回 `Ok` 时标记为 completed。
    pub fn submit<F, Fut>(&self, kind: &str, job: F) -> TaskId
    where
        F: FnOnce(TaskHandle, CancellationToken) -> Fut,
        Fut: Future<Output = AppResult<RunSummary>> + Send + 'static,
    {
        self.prune();

        let id = Uuid::new_v4().to_string();
        let progress = Arc::new(RwLock::new(TaskProgress::new(kind, "Starting...")));
        let cancel = CancellationToken::new();
        self.tasks.insert(
            id.clone(),
            TaskEntry {
                progress: progress.clone(),
                cancel: cancel.clone(),
            },
        );

        let handle = TaskHandle {
            id: id.clone(),
            progress,
        };
        let future = job(handle.clone(), cancel);
        info!("🚀 任务 {} 已启动: {}", id, kind);

        tokio::spawn(async move {
            match tokio::spawn(future).await {
                Ok(Ok(summary)) => handle.complete(summary),
                Ok(Err(e)) => handle.fail(&e.to_string()),
                Err(e) => handle.fail(&format!("Task aborted: {}", e)),
            }
        });

        id
    }

    /// 进度快照
    pub fn get_progress(&self, id: &str) -> Option<TaskProgress> {
        self.tasks.get(id).map(|entry| read(&entry.progress).clone())
    }

    /// 请求取消运行中的任务；任务在下一个检查点结束
    pub fn cancel(&self, id: &str) -> bool {
        match self.tasks.get(id) {
            Some(entry) if !read(&entry.progress).status.is_finished() => {
                entry.cancel.cancel();
                info!("🛑 已请求取消任务 {}", id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 清理过期与超量的已结束任务
    pub fn prune(&self) {
        let now = Local::now();
        let ttl = self.ttl;
        self.tasks.retain(|_, entry| match read(&entry.progress).finished_at {
            Some(finished) => now - finished < ttl,
            None => true,
        });

        if self.tasks.len() < self.max_tasks {
            return;
        }
        let mut finished: Vec<(chrono::DateTime<Local>, TaskId)> = self
            .tasks
            .iter()
            .filter_map(|e| read(&e.progress).finished_at.map(|t| (t, e.key().clone())))
            .collect();
        finished.sort();

        let excess = self.tasks.len() + 1 - self.max_tasks;
        for (_, id) in finished.into_iter().take(excess) {
            debug!("淘汰已结束的任务 {}", id);
            self.tasks.remove(&id);
        }
    }
}

/// 任务自身持有的进度写入端
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    progress: Arc<RwLock<TaskProgress>>,
}

impl TaskHandle {
    /// 不在执行器中登记的句柄
    pub fn standalone(kind: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            progress: Arc::new(RwLock::new(TaskProgress::new(kind, "Starting..."))),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> TaskProgress {
        read(&self.progress).clone()
    }

    /// 标记完成；已结束的任务不受影响
    pub fn complete(&self, summary: RunSummary) {
        let mut p = write(&self.progress);
        if p.status.is_finished() {
            return;
        }
        p.status = TaskStatus::Completed;
        p.progress = 100;
        p.message = summary.message;
        p.counts = summary.counts;
        p.output_filename = summary.output_filename;
        p.columns = summary.columns;
        p.finished_at = Some(Local::now());
        info!("✅ 任务 {} 完成: {}", self.id, p.message);
    }

    pub fn fail(&self, message: &str) {
        let mut p = write(&self.progress);
        if p.status.is_finished() {
            return;
        }
        p.status = TaskStatus::Error;
        p.message = message.to_string();
        p.logs.push(format!("❌ Error: {}", message));
        p.finished_at = Some(Local::now());
        error!("❌ 任务 {} 失败: {}", self.id, message);
    }
}

impl RunReporter for TaskHandle {
    fn set_progress(&self, percent: u8) {
        let mut p = write(&self.progress);
        p.progress = percent.min(100).max(p.progress);
    }

    fn set_message(&self, message: &str) {
        write(&self.progress).message = message.to_string();
    }

    fn log(&self, line: &str) {
        info!("[任务 {}] {}", self.id, line);
        write(&self.progress).logs.push(line.to_string());
    }

    fn update_counts(&self, counts: TaskCounts) {
        write(&self.progress).counts = counts;
    }
}

fn read(lock: &RwLock<TaskProgress>) -> RwLockReadGuard<'_, TaskProgress> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(lock: &RwLock<TaskProgress>) -> RwLockWriteGuard<'_, TaskProgress> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
