pub mod bulk_flow;
pub mod eligibility;
pub mod run_ctx;

pub use bulk_flow::{BulkFlow, RunPhase, RunReporter, RunSummary};
pub use eligibility::Eligibility;
pub use run_ctx::RunRequest;
