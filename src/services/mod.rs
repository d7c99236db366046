pub mod action_dispatcher;
pub mod artifact_writer;
pub mod column_order;
pub mod credential_store;
pub mod region_resolver;
pub mod session_controller;

pub use action_dispatcher::ActionDispatcher;
pub use artifact_writer::{ArtifactInfo, ArtifactKind, ArtifactWriter, ColumnListing};
pub use credential_store::CredentialStore;
pub use region_resolver::RegionResolver;
pub use session_controller::{LoginOutcome, LoginState, SessionController, SessionGuard};
