pub mod action;
pub mod assignment;
pub mod region;
pub mod session;
pub mod task;

pub use action::{ActionLogEntry, ActionOutcome, ActionResult, ActionType};
pub use assignment::{Assignment, StatusEvent};
pub use region::{CacheStatus, RegionLevel, RegionNode, SmallCodeEntry, WilayahCache};
pub use session::{SavedCookie, SavedCredentials, Session};
pub use task::{TaskCounts, TaskProgress, TaskStatus};
