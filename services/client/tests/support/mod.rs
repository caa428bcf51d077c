//! Shared test support: an in-memory backend implementing the service ports,
//! with switchable failure modes and call counting.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use taskdeck_core::domain::{
    NewTask, Session, SessionChange, SignupOutcome, Task, TaskPatch, User,
};
use taskdeck_core::ports::{
    AuthService, PortError, PortResult, SessionChangeStream, TaskService,
};

pub struct FakeAccount {
    pub id: Uuid,
    pub email: String,
    pub password: String,
    pub username: Option<String>,
    pub confirmed: bool,
}

/// An in-memory stand-in for the hosted backend. Owner filtering mirrors the
/// server-side row-level check: every task operation matches id AND owner.
pub struct FakeBackend {
    auto_confirm: bool,
    base_time: DateTime<Utc>,
    clock: AtomicI64,
    accounts: Mutex<Vec<FakeAccount>>,
    tasks: Mutex<Vec<Task>>,
    session: Mutex<Option<Session>>,
    recovery_tokens: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<SessionChange>,
    pub profiles: Mutex<Vec<(Uuid, String, String)>>,
    pub reset_requests: Mutex<Vec<(String, String)>>,
    pub network_calls: AtomicUsize,
    pub fail_tasks: AtomicBool,
    pub fail_sign_out: AtomicBool,
    pub fail_reset: AtomicBool,
    pub fail_credential_update: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::with_auto_confirm(true)
    }

    pub fn with_auto_confirm(auto_confirm: bool) -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            auto_confirm,
            base_time: Utc::now(),
            clock: AtomicI64::new(0),
            accounts: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            session: Mutex::new(None),
            recovery_tokens: Mutex::new(HashMap::new()),
            changes,
            profiles: Mutex::new(Vec::new()),
            reset_requests: Mutex::new(Vec::new()),
            network_calls: AtomicUsize::new(0),
            fail_tasks: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
            fail_reset: AtomicBool::new(false),
            fail_credential_update: AtomicBool::new(false),
        }
    }

    pub fn add_account(&self, email: &str, password: &str, username: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        self.accounts.lock().unwrap().push(FakeAccount {
            id,
            email: email.to_string(),
            password: password.to_string(),
            username: username.map(str::to_string),
            confirmed: true,
        });
        id
    }

    pub fn add_recovery_token(&self, token: &str, email: &str) {
        self.recovery_tokens
            .lock()
            .unwrap()
            .insert(token.to_string(), email.to_string());
    }

    /// Simulates an unsolicited backend-side session event.
    pub fn push_change(&self, change: SessionChange) {
        let _ = self.changes.send(change);
    }

    pub fn session_active(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    pub fn calls(&self) -> usize {
        self.network_calls.load(Ordering::SeqCst)
    }

    pub fn password_of(&self, email: &str) -> Option<String> {
        self.accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.email == email)
            .map(|a| a.password.clone())
    }

    fn record_call(&self) {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Strictly increasing creation timestamps, independent of test timing.
    fn next_created_at(&self) -> DateTime<Utc> {
        let n = self.clock.fetch_add(1, Ordering::SeqCst);
        self.base_time + ChronoDuration::seconds(n)
    }

    fn make_session(&self, account: &FakeAccount) -> Session {
        Session {
            access_token: Uuid::new_v4().to_string(),
            refresh_token: Uuid::new_v4().to_string(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
            user: User {
                id: account.id,
                email: account.email.clone(),
                username: account.username.clone(),
            },
        }
    }
}

#[async_trait]
impl AuthService for FakeBackend {
    async fn current_session(&self) -> PortResult<Option<Session>> {
        self.record_call();
        Ok(self.session.lock().unwrap().clone())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> PortResult<Session> {
        self.record_call();
        let session = {
            let accounts = self.accounts.lock().unwrap();
            let account = accounts
                .iter()
                .find(|a| a.email == email && a.password == password && a.confirmed)
                .ok_or(PortError::InvalidCredentials)?;
            self.make_session(account)
        };
        *self.session.lock().unwrap() = Some(session.clone());
        let _ = self.changes.send(SessionChange::SignedIn(session.user.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: Option<&str>,
    ) -> PortResult<SignupOutcome> {
        self.record_call();
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.iter().any(|a| a.email == email) {
            return Err(PortError::Registration("User already registered".to_string()));
        }
        let account = FakeAccount {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password: password.to_string(),
            username: username.map(str::to_string),
            confirmed: self.auto_confirm,
        };
        let outcome = if self.auto_confirm {
            let session = self.make_session(&account);
            *self.session.lock().unwrap() = Some(session.clone());
            let _ = self.changes.send(SessionChange::SignedIn(session.user.clone()));
            SignupOutcome::Authenticated(session)
        } else {
            SignupOutcome::ConfirmationPending(Some(User {
                id: account.id,
                email: account.email.clone(),
                username: account.username.clone(),
            }))
        };
        accounts.push(account);
        Ok(outcome)
    }

    async fn sign_out(&self) -> PortResult<()> {
        self.record_call();
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(PortError::Backend("Service unavailable".to_string()));
        }
        *self.session.lock().unwrap() = None;
        let _ = self.changes.send(SessionChange::SignedOut);
        Ok(())
    }

    async fn request_password_reset(&self, email: &str, redirect_to: &str) -> PortResult<()> {
        self.record_call();
        self.reset_requests
            .lock()
            .unwrap()
            .push((email.to_string(), redirect_to.to_string()));
        if self.fail_reset.load(Ordering::SeqCst) {
            return Err(PortError::Backend("Rate limit exceeded".to_string()));
        }
        let known = self.accounts.lock().unwrap().iter().any(|a| a.email == email);
        if !known {
            return Err(PortError::NotFound(format!("No account for {email}")));
        }
        Ok(())
    }

    async fn exchange_recovery_token(&self, token: &str) -> PortResult<Session> {
        self.record_call();
        // One-time: the token is consumed whether or not the reset finishes.
        let email = self
            .recovery_tokens
            .lock()
            .unwrap()
            .remove(token)
            .ok_or_else(|| {
                PortError::LinkInvalid("Token has expired or is invalid".to_string())
            })?;
        let session = {
            let accounts = self.accounts.lock().unwrap();
            let account = accounts
                .iter()
                .find(|a| a.email == email)
                .ok_or_else(|| PortError::LinkInvalid("Unknown account".to_string()))?;
            self.make_session(account)
        };
        *self.session.lock().unwrap() = Some(session.clone());
        let _ = self.changes.send(SessionChange::SignedIn(session.user.clone()));
        Ok(session)
    }

    async fn update_credential(&self, new_password: &str) -> PortResult<()> {
        self.record_call();
        if self.fail_credential_update.load(Ordering::SeqCst) {
            return Err(PortError::Backend("Password update failed".to_string()));
        }
        let user = self
            .session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.user.clone())
            .ok_or(PortError::Unauthorized)?;
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .iter_mut()
            .find(|a| a.id == user.id)
            .ok_or(PortError::Unauthorized)?;
        account.password = new_password.to_string();
        Ok(())
    }

    fn subscribe_session_changes(&self) -> SessionChangeStream {
        let mut receiver = self.changes.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(change) => yield change,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn resolve_username(&self, username: &str) -> PortResult<String> {
        self.record_call();
        self.accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| {
                a.username
                    .as_deref()
                    .is_some_and(|u| u.eq_ignore_ascii_case(username))
            })
            .map(|a| a.email.clone())
            .ok_or_else(|| PortError::NotFound(format!("No account named '{username}'")))
    }

    async fn create_profile(&self, user_id: Uuid, username: &str, email: &str) -> PortResult<()> {
        self.record_call();
        self.profiles
            .lock()
            .unwrap()
            .push((user_id, username.to_string(), email.to_string()));
        Ok(())
    }
}

#[async_trait]
impl TaskService for FakeBackend {
    async fn list_tasks(&self, user_id: Uuid) -> PortResult<Vec<Task>> {
        self.record_call();
        if self.fail_tasks.load(Ordering::SeqCst) {
            return Err(PortError::Backend("Service unavailable".to_string()));
        }
        if self.session.lock().unwrap().is_none() {
            return Err(PortError::Unauthorized);
        }
        let mut rows: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert_task(&self, user_id: Uuid, new_task: NewTask) -> PortResult<Task> {
        self.record_call();
        if self.fail_tasks.load(Ordering::SeqCst) {
            return Err(PortError::Backend("Service unavailable".to_string()));
        }
        if self.session.lock().unwrap().is_none() {
            return Err(PortError::Unauthorized);
        }
        let task = Task {
            id: Uuid::new_v4(),
            title: new_task.title,
            description: new_task.description,
            status: new_task.status,
            created_at: self.next_created_at(),
            user_id,
        };
        self.tasks.lock().unwrap().push(task.clone());
        Ok(task)
    }

    async fn update_task(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        patch: TaskPatch,
    ) -> PortResult<Task> {
        self.record_call();
        if self.fail_tasks.load(Ordering::SeqCst) {
            return Err(PortError::Backend("Service unavailable".to_string()));
        }
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id && t.user_id == user_id)
            .ok_or_else(|| PortError::NotFound(format!("Task {task_id} not found")))?;
        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        Ok(task.clone())
    }

    async fn delete_task(&self, user_id: Uuid, task_id: Uuid) -> PortResult<()> {
        self.record_call();
        if self.fail_tasks.load(Ordering::SeqCst) {
            return Err(PortError::Backend("Service unavailable".to_string()));
        }
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|t| !(t.id == task_id && t.user_id == user_id));
        if tasks.len() == before {
            return Err(PortError::NotFound(format!("Task {task_id} not found")));
        }
        Ok(())
    }
}

/// Waits until `pred` holds for the watched state, or panics after two
/// seconds. `borrow` + `changed` never misses an update in between.
pub async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, mut pred: F)
where
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(std::time::Duration::from_secs(2), async {
        loop {
            if pred(&rx.borrow()) {
                return;
            }
            if rx.changed().await.is_err() {
                panic!("state channel closed");
            }
        }
    })
    .await
    .expect("condition not reached in time");
}
