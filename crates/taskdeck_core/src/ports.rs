//! crates/taskdeck_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! stores to be independent of the concrete hosted-backend SDK.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{NewTask, Session, SessionChange, SignupOutcome, Task, TaskPatch};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A typed error for all port operations.
///
/// The adapter maps the backend's ad hoc `{data, error}` responses into these
/// variants at the gateway boundary; nothing above the ports ever inspects a
/// raw status code or nullable field.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The backend rejected an email/password pair.
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// The backend refused a signup (duplicate email, weak password, ...).
    /// The message is surfaced verbatim.
    #[error("Registration rejected: {0}")]
    Registration(String),
    /// No session, or the session no longer authorizes the request.
    #[error("Unauthorized")]
    Unauthorized,
    /// A recovery token could not be exchanged for a scoped session.
    #[error("Recovery link invalid: {0}")]
    LinkInvalid(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    /// Network or service failure; the message is user-displayable.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// The stream handed out by [`AuthService::subscribe_session_changes`].
pub type SessionChangeStream = Pin<Box<dyn Stream<Item = SessionChange> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The hosted backend's authentication surface.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Returns the session the backend currently holds, if any.
    async fn current_session(&self) -> PortResult<Option<Session>>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> PortResult<Session>;

    /// The optional `username` travels as signup metadata and becomes the
    /// display name.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: Option<&str>,
    ) -> PortResult<SignupOutcome>;

    async fn sign_out(&self) -> PortResult<()>;

    /// Asks the backend to dispatch a reset email whose link targets
    /// `redirect_to` with a one-time recovery token attached.
    async fn request_password_reset(&self, email: &str, redirect_to: &str) -> PortResult<()>;

    /// Exchanges a recovery token for a short-lived session scoped to a
    /// credential change. Fails with [`PortError::LinkInvalid`] for expired,
    /// malformed or reused tokens.
    async fn exchange_recovery_token(&self, token: &str) -> PortResult<Session>;

    /// Updates the password of the currently authenticated session.
    async fn update_credential(&self, new_password: &str) -> PortResult<()>;

    /// A persistent subscription to session-change notifications: sign-in
    /// elsewhere, token refresh, sign-out, expiry. The stream stays open for
    /// the lifetime of the adapter.
    fn subscribe_session_changes(&self) -> SessionChangeStream;

    /// Resolves a display name to the email it was registered with, via the
    /// profiles table.
    async fn resolve_username(&self, username: &str) -> PortResult<String>;

    /// Best-effort profile row for a freshly created user.
    async fn create_profile(&self, user_id: Uuid, username: &str, email: &str) -> PortResult<()>;
}

/// Row-scoped access to the tasks table.
///
/// Every operation carries the owner id and the backend applies the row-level
/// ownership filter (id AND owner); a locally-held id never authorizes a
/// mutation on its own.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// All tasks owned by `user_id`, ordered by creation time descending.
    async fn list_tasks(&self, user_id: Uuid) -> PortResult<Vec<Task>>;

    /// Inserts a task; the server assigns id, timestamp and owner.
    async fn insert_task(&self, user_id: Uuid, new_task: NewTask) -> PortResult<Task>;

    /// Applies a partial update and returns the full updated row.
    async fn update_task(&self, user_id: Uuid, task_id: Uuid, patch: TaskPatch)
        -> PortResult<Task>;

    async fn delete_task(&self, user_id: Uuid, task_id: Uuid) -> PortResult<()>;
}
