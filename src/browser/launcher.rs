use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chromiumoxide::handler::Handler;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::Config;

/// 启动后等待浏览器状态同步的时间
const SETTLE: Duration = Duration::from_millis(300);

/// 启动浏览器并打开空白页
///
/// 登录需要人工处理密码管理器弹窗，默认以有界面模式启动。
pub async fn launch_browser(config: &Config) -> Result<(Browser, Page, JoinHandle<()>)> {
    info!("🚀 启动浏览器...");

    let mut builder = BrowserConfig::builder();
    builder = if config.headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };
    if let Some(exe) = &config.chrome_executable {
        debug!("使用浏览器: {}", exe);
        builder = builder.chrome_executable(Path::new(exe));
    }

    let browser_config = builder
        .args(vec!["--log-level=3", "--disable-logging", "--no-sandbox"])
        .build()
        .map_err(|e| anyhow!("配置浏览器失败: {}", e))?;

    let (browser, handler) = Browser::launch(browser_config).await.map_err(|e| {
        error!("启动浏览器失败: {}", e);
        anyhow!("启动浏览器失败: {}", e)
    })?;
    open_page(browser, handler).await
}

/// 连接到带 `--remote-debugging-port` 启动的浏览器，新建一个页面
pub async fn connect_browser(port: u16) -> Result<(Browser, Page, JoinHandle<()>)> {
    let url = format!("http://localhost:{}", port);
    info!("🔌 正在连接到浏览器: {}", url);

    let (browser, handler) = Browser::connect(&url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        anyhow!("连接浏览器 {} 失败: {}", url, e)
    })?;
    open_page(browser, handler).await
}

async fn open_page(
    browser: Browser,
    mut handler: Handler,
) -> Result<(Browser, Page, JoinHandle<()>)> {
    // 在后台处理浏览器事件，出错即退出
    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });
    sleep(SETTLE).await;

    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| anyhow!("创建页面失败: {}", e))?;

    info!("✅ 浏览器已就绪");
    Ok((browser, page, handler_task))
}
