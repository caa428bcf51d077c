//! crates/taskdeck_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any wire format or HTTP concern.

use uuid::Uuid;
use chrono::{DateTime, Utc};

// Represents a user - the identity issued by the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
}

/// A backend-issued credential pair authorizing requests as a given user.
///
/// Owned and rotated entirely by the backend adapter; the stores only
/// observe it and never inspect the tokens themselves.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// The status column of a task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }

    /// The binary status shortcut: `Done` reverts to `Todo`, everything else
    /// completes to `Done`. `InProgress` is not part of the cycle.
    pub fn toggled(self) -> Self {
        match self {
            TaskStatus::Done => TaskStatus::Todo,
            _ => TaskStatus::Done,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a single to-do item owned by one user.
///
/// `id`, `created_at` and `user_id` are always server-assigned; the client
/// never fabricates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub user_id: Uuid,
}

/// The client-settable fields of a task about to be created.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
}

/// A partial update; only populated fields are sent to the backend.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.status.is_none()
    }
}

/// What the backend did with a signup request.
///
/// Depending on backend configuration a new user is either authenticated
/// immediately or parked until the verification email is confirmed; callers
/// need to know which happened.
#[derive(Debug, Clone)]
pub enum SignupOutcome {
    Authenticated(Session),
    /// The account may exist without a session yet; the user record is
    /// present when the backend returned one.
    ConfirmationPending(Option<User>),
}

/// An unsolicited session-state notification pushed by the backend adapter.
#[derive(Debug, Clone)]
pub enum SessionChange {
    SignedIn(User),
    TokenRefreshed(User),
    SignedOut,
    Expired,
}
