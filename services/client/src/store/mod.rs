pub mod auth;
pub mod recovery;
pub mod tasks;

// Re-export the store types to make them easily accessible to the shell
// that embeds this crate.
pub use auth::{AuthError, AuthSnapshot, AuthStore};
pub use recovery::{FlowError, RecoveryFlow, RecoveryState, REDIRECT_DELAY};
pub use tasks::{TaskController, TaskError, TaskViewState};
