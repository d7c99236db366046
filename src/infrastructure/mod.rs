pub mod chrome_driver;
pub mod ui_driver;

pub use chrome_driver::{ChromeDriver, ChromeLauncher};
pub use ui_driver::{wait_until_clickable, DriverFactory, Locator, UiDriver, UiError};
