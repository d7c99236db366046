//! 浏览器进程的启动与连接
pub mod launcher;

pub use launcher::{connect_browser, launch_browser};
