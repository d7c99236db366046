use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use fasih_review::utils::logging;
use fasih_review::{ActionType, App, Config, LoginOutcome, RunRequest};
use tracing::{info, warn};

/// 轮询任务进度的间隔
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load()?;

    // 初始化日志
    logging::init(config.verbose_logging);
    logging::log_startup(&config);

    let app = App::initialize(config)?;

    let username = env_required("FASIH_USERNAME")?;
    let password = env_required("FASIH_PASSWORD")?;
    login(&app, &username, &password).await?;

    let req = request_from_env()?;
    let task_id = match std::env::var("FASIH_ACTION") {
        Ok(action) if action.trim().eq_ignore_ascii_case("download") => {
            let columns: Vec<String> = std::env::var("FASIH_COLUMNS")
                .map(|c| {
                    c.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            app.start_download(req, columns)?
        }
        Ok(action) => {
            let action: ActionType = action.parse().map_err(anyhow::Error::msg)?;
            app.start_action(req, action)?
        }
        Err(_) => bail!("FASIH_ACTION required (download / approve / revoke / reject)"),
    };

    // 打印新增日志直到任务结束
    let mut printed = 0;
    let progress = loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let Some(progress) = app.progress(&task_id) else {
            bail!("task {} disappeared", task_id);
        };
        for line in progress.logs.iter().skip(printed) {
            println!("{}", line);
        }
        printed = progress.logs.len();
        if progress.status.is_finished() {
            break progress;
        }
    };

    logging::print_final_stats(&progress);
    println!("{}", progress.message);
    app.logout().await;
    Ok(())
}

/// 登录，必要时从标准输入读取 OTP
async fn login(app: &App, username: &str, password: &str) -> Result<()> {
    let mut outcome = app.login(username, password).await?;
    loop {
        match outcome {
            LoginOutcome::Authenticated { restored } => {
                info!("✅ 登录成功{}", if restored { "（恢复保存的会话）" } else { "" });
                return Ok(());
            }
            LoginOutcome::NeedsOtp | LoginOutcome::WrongOtp => {
                println!("{}", outcome.message());
                let code = read_line("OTP: ")?;
                outcome = app.submit_otp(&code).await?;
            }
            LoginOutcome::OtpBlocked => {
                warn!("⚠️ {}", outcome.message());
                app.clear_otp().await?;
                let code = read_line("OTP: ")?;
                outcome = app.submit_otp(&code).await?;
            }
        }
    }
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{} required", key))
}

fn request_from_env() -> Result<RunRequest> {
    let optional = |key: &str| std::env::var(key).unwrap_or_default();
    Ok(RunRequest {
        survey_id: env_required("FASIH_SURVEY_ID")?,
        period_id: env_required("FASIH_PERIOD_ID")?,
        template_id: env_required("FASIH_TEMPLATE_ID")?,
        group_id: env_required("FASIH_GROUP_ID")?,
        kab_id: env_required("FASIH_KAB_ID")?,
        kab_name: optional("FASIH_KAB_NAME"),
        survey_name: optional("FASIH_SURVEY_NAME"),
        period_name: optional("FASIH_PERIOD_NAME"),
    })
}
