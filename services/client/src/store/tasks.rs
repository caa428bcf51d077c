//! services/client/src/store/tasks.rs
//!
//! The task list controller: owns the in-memory task collection, issues
//! gateway calls, and merges results into view state.
//!
//! The collection is the only local copy of the working set. It is refreshed
//! wholesale on [`TaskController::load_all`] and patched element-wise after
//! each successful mutation; a failed mutation never changes it.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use taskdeck_core::domain::{NewTask, Task, TaskPatch, TaskStatus};
use taskdeck_core::ports::{PortError, TaskService};
use taskdeck_core::validate::{self, ValidationError, DESCRIPTION_MAX_CHARS};

use crate::store::auth::AuthStore;

const FAILED_LOAD: &str = "Failed to load tasks.";
const FAILED_CREATE: &str = "Failed to create task.";
const FAILED_UPDATE: &str = "Failed to update task.";
const FAILED_DELETE: &str = "Failed to delete task.";

/// An immutable view of the task list state.
#[derive(Debug, Clone)]
pub struct TaskViewState {
    /// The working set, newest first.
    pub tasks: Vec<Task>,
    pub loading: bool,
    pub error: Option<String>,
}

/// Errors surfaced by the controller operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Not signed in")]
    Unauthorized,
    /// The id is not in the locally-held collection.
    #[error("Task {0} is not in the current list")]
    UnknownTask(Uuid),
    #[error("{0}")]
    Backend(String),
}

fn from_port(error: PortError) -> TaskError {
    match error {
        PortError::Unauthorized => TaskError::Unauthorized,
        other => TaskError::Backend(other.to_string()),
    }
}

pub struct TaskController {
    gateway: Arc<dyn TaskService>,
    auth: Arc<AuthStore>,
    state: watch::Sender<TaskViewState>,
}

impl TaskController {
    pub fn new(gateway: Arc<dyn TaskService>, auth: Arc<AuthStore>) -> Self {
        let initial = TaskViewState {
            tasks: Vec::new(),
            loading: true,
            error: None,
        };
        let (state, _) = watch::channel(initial);
        Self {
            gateway,
            auth,
            state,
        }
    }

    pub fn snapshot(&self) -> TaskViewState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskViewState> {
        self.state.subscribe()
    }

    fn require_user(&self) -> Result<Uuid, TaskError> {
        self.auth
            .current_user()
            .map(|user| user.id)
            .ok_or(TaskError::Unauthorized)
    }

    fn flag_error(&self, message: &str) {
        self.state.send_modify(|s| {
            s.loading = false;
            s.error = Some(message.to_string());
        });
    }

    /// Fetches every task owned by the current user, newest first.
    ///
    /// On any backend or auth error the collection is reported empty with the
    /// error flag set; a stale working set is never shown.
    pub async fn load_all(&self) -> Result<(), TaskError> {
        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });

        let user_id = match self.require_user() {
            Ok(id) => id,
            Err(e) => {
                self.state.send_modify(|s| {
                    s.tasks.clear();
                    s.loading = false;
                    s.error = Some(FAILED_LOAD.to_string());
                });
                return Err(e);
            }
        };

        match self.gateway.list_tasks(user_id).await {
            Ok(tasks) => {
                info!(count = tasks.len(), "Tasks fetched");
                self.state.send_modify(|s| {
                    s.tasks = tasks;
                    s.loading = false;
                });
                Ok(())
            }
            Err(e) => {
                warn!("Task fetch failed: {e}");
                self.state.send_modify(|s| {
                    s.tasks.clear();
                    s.loading = false;
                    s.error = Some(FAILED_LOAD.to_string());
                });
                Err(from_port(e))
            }
        }
    }

    /// Creates a task and prepends the server-returned row, preserving the
    /// newest-first order. Field limits are checked locally before any
    /// network call.
    pub async fn create(
        &self,
        title: &str,
        description: &str,
        status: TaskStatus,
    ) -> Result<Task, TaskError> {
        validate::check_task_fields(title, description)?;
        let user_id = self.require_user()?;

        let new_task = NewTask {
            title: title.to_string(),
            description: description.to_string(),
            status,
        };
        match self.gateway.insert_task(user_id, new_task).await {
            Ok(task) => {
                info!(task_id = %task.id, "Task created");
                self.state.send_modify(|s| {
                    s.tasks.insert(0, task.clone());
                    s.error = None;
                });
                Ok(task)
            }
            Err(e) => {
                warn!("Task create failed: {e}");
                self.flag_error(FAILED_CREATE);
                Err(from_port(e))
            }
        }
    }

    /// Sends only the changed fields; on success the matching element is
    /// replaced in place, keeping its position (no re-sort).
    pub async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<Task, TaskError> {
        if let Some(title) = patch.title.as_deref() {
            validate::check_task_fields(title, patch.description.as_deref().unwrap_or(""))?;
        } else if let Some(description) = patch.description.as_deref() {
            if description.chars().count() > DESCRIPTION_MAX_CHARS {
                return Err(ValidationError::DescriptionTooLong.into());
            }
        }
        let user_id = self.require_user()?;

        if patch.is_empty() {
            // Nothing to send; answer from the working set.
            return self
                .state
                .borrow()
                .tasks
                .iter()
                .find(|t| t.id == id)
                .cloned()
                .ok_or(TaskError::UnknownTask(id));
        }

        match self.gateway.update_task(user_id, id, patch).await {
            Ok(updated) => {
                info!(task_id = %updated.id, "Task updated");
                self.state.send_modify(|s| {
                    if let Some(slot) = s.tasks.iter_mut().find(|t| t.id == updated.id) {
                        *slot = updated.clone();
                    }
                    s.error = None;
                });
                Ok(updated)
            }
            Err(e) => {
                warn!("Task update failed: {e}");
                self.flag_error(FAILED_UPDATE);
                Err(from_port(e))
            }
        }
    }

    /// The binary status shortcut: reads the current status from local state
    /// and updates to its complement (`done` reverts to `todo`, everything
    /// else completes to `done`).
    pub async fn toggle_status(&self, id: Uuid) -> Result<Task, TaskError> {
        let current = self
            .state
            .borrow()
            .tasks
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.status)
            .ok_or(TaskError::UnknownTask(id))?;

        let patch = TaskPatch {
            status: Some(current.toggled()),
            ..TaskPatch::default()
        };
        self.update(id, patch).await
    }

    /// Deletes a task and removes it from local state on backend success.
    ///
    /// Destructive: callers are expected to have confirmed with the user
    /// before calling this.
    pub async fn delete(&self, id: Uuid) -> Result<(), TaskError> {
        let user_id = self.require_user()?;

        match self.gateway.delete_task(user_id, id).await {
            Ok(()) => {
                info!(task_id = %id, "Task deleted");
                self.state.send_modify(|s| {
                    s.tasks.retain(|t| t.id != id);
                    s.error = None;
                });
                Ok(())
            }
            Err(e) => {
                warn!("Task delete failed: {e}");
                self.flag_error(FAILED_DELETE);
                Err(from_port(e))
            }
        }
    }
}
