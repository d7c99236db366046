//! # FASIH Review
//!
//! FASIH-SM 调查审阅的批量自动化引擎
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（浏览器上下文），只暴露能力
//! - `UiDriver` - 页面操作抽象，`ChromeDriver` 为 chromiumoxide 实现
//! - `clients/` - FASIH-SM 只读接口客户端
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `CredentialStore` - 保存 / 读取会话文件
//! - `SessionController` - SSO 登录、OTP、会话注入与恢复
//! - `ActionDispatcher` - 带重试的按钮点击
//! - `RegionResolver` - 区域树展开与缓存
//! - `ArtifactWriter` - 写审计日志与原始数据表
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个县/市"的完整批量流程
//! - `RunRequest` - 上下文封装（survey + period + kabupaten）
//! - `BulkFlow` - 流程编排（区域 → 任务单 → 资格 → 点击 → 产物）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/task_executor` - 后台任务与可轮询的进度
//! - `orchestrator/app` - 组装所有组件的入口
//!
//! ## 模块结构

pub mod browser;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{ChromeDriver, UiDriver};
pub use models::{ActionType, TaskProgress, TaskStatus};
pub use orchestrator::{App, TaskExecutor};
pub use services::{LoginOutcome, SessionController};
pub use workflow::{BulkFlow, RunRequest};
