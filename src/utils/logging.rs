//! 日志工具模块
//!
//! 提供日志初始化和输出的辅助函数

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::task::TaskProgress;
use crate::workflow::RunRequest;

/// 初始化 tracing 日志
///
/// 优先使用 `RUST_LOG`；未设置时为 `info`，`verbose_logging` 时为 `debug`。
/// 重复调用不会报错（测试中会多次初始化）。
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - FASIH-SM 批量审阅");
    info!("🌐 站点: {}", config.fasih_base_url);
    info!("📂 输出目录: {}", config.output_dir.display());
    info!("🔁 最大点击次数: {}", config.max_click_attempts);
    info!("{}", "=".repeat(60));
}

/// 记录任务开始信息
///
/// # 参数
/// - `kind`: 任务类型（download / approve / revoke / reject）
/// - `req`: 任务输入
/// - `task_id`: 任务 id
pub fn log_run_start(kind: &str, req: &RunRequest, task_id: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始任务 {} ({})", task_id, kind);
    info!(
        "📄 {} / {} / {}",
        req.survey_name, req.period_name, req.kab_name
    );
    info!("{}", "=".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(progress: &TaskProgress) {
    info!("\n{}", "=".repeat(60));
    info!("📊 任务结束统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("状态: {:?}", progress.status);
    info!("✅ 成功: {}", progress.counts.success);
    info!("❌ 失败: {}", progress.counts.failed);
    info!("⏭️ 跳过: {}", progress.counts.skipped);
    info!("📋 任务单总数: {}", progress.counts.total_assignments);
    info!("{}", "=".repeat(60));
    if let Some(filename) = &progress.output_filename {
        info!("\n结果已保存至: {}", filename);
    }
}

/// 按字符数截断，超出部分用 `...` 代替
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
