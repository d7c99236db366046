pub mod app;
pub mod task_executor;

pub use app::{App, LoginStatus};
pub use task_executor::{TaskExecutor, TaskHandle, TaskId};
