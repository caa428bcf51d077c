//! services/client/src/adapters/rest.rs
//!
//! This module contains the backend adapter, which is the concrete implementation
//! of the `AuthService` and `TaskService` ports from the `core` crate. It handles
//! all interactions with the hosted backend over its auth and row-scoped table
//! HTTP APIs using `reqwest`.
//!
//! The adapter owns the session: it caches the current token pair, rotates it
//! shortly before expiry on a background task, and broadcasts every session
//! transition to subscribers. Everything above this module only ever sees
//! domain types and `PortError`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskdeck_core::domain::{
    NewTask, Session, SessionChange, SignupOutcome, Task, TaskPatch, TaskStatus, User,
};
use taskdeck_core::ports::{
    AuthService, PortError, PortResult, SessionChangeStream, TaskService,
};

use crate::config::Config;
use crate::error::ClientError;

/// Seconds before token expiry at which the background task rotates it.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Capacity of the session-change broadcast channel. Slow subscribers that
/// lag behind simply skip to the most recent events.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A backend adapter that implements the `AuthService` and `TaskService` ports.
#[derive(Clone)]
pub struct RestAdapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    http: reqwest::Client,
    base_url: String,
    session: RwLock<Option<Session>>,
    changes: broadcast::Sender<SessionChange>,
    /// Cancels the refresh task belonging to the current session.
    refresh_guard: StdMutex<Option<CancellationToken>>,
}

impl RestAdapter {
    /// Creates a new `RestAdapter` from configuration.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let mut api_key = reqwest::header::HeaderValue::from_str(&config.anon_key)
            .map_err(|e| ClientError::Internal(format!("Invalid BACKEND_ANON_KEY: {e}")))?;
        api_key.set_sensitive(true);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("apikey", api_key);

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .default_headers(headers)
            .build()?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(AdapterInner {
                http,
                base_url: config.backend_url.clone(),
                session: RwLock::new(None),
                changes,
                refresh_guard: StdMutex::new(None),
            }),
        })
    }

    /// The access token of the cached session, or `Unauthorized`.
    async fn bearer(&self) -> PortResult<String> {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(PortError::Unauthorized)
    }

    /// Installs `session` as the current one, restarts the refresh task for
    /// it, and notifies subscribers with `change`.
    async fn adopt_session(&self, session: Session, change: SessionChange) {
        *self.inner.session.write().await = Some(session);
        self.spawn_refresh_task();
        let _ = self.inner.changes.send(change);
    }

    /// Drops the cached session and stops its refresh task. Subscribers are
    /// notified by the caller, which knows whether this was a sign-out or an
    /// expiry.
    async fn drop_session(&self) {
        self.inner.cancel_refresh_task();
        *self.inner.session.write().await = None;
    }

    fn spawn_refresh_task(&self) {
        let cancel = CancellationToken::new();
        self.inner.install_refresh_token(cancel.clone());
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(refresh_loop(weak, cancel));
    }
}

impl AdapterInner {
    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn install_refresh_token(&self, cancel: CancellationToken) {
        let previous = self
            .refresh_guard
            .lock()
            .expect("refresh guard poisoned")
            .replace(cancel);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn cancel_refresh_task(&self) {
        if let Some(token) = self.refresh_guard.lock().expect("refresh guard poisoned").take() {
            token.cancel();
        }
    }

    /// Exchanges a refresh token for a rotated session.
    async fn request_refresh(&self, refresh_token: &str) -> PortResult<Session> {
        let response = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(transport_err)?;

        if !response.status().is_success() {
            let (_, message) = error_message(response).await;
            return Err(PortError::Backend(message));
        }
        let record: TokenRecord = response.json().await.map_err(transport_err)?;
        Ok(record.to_domain())
    }
}

impl Drop for AdapterInner {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.refresh_guard.lock() {
            if let Some(token) = guard.take() {
                token.cancel();
            }
        }
    }
}

/// Background task that rotates the token shortly before it expires.
///
/// Holds only a weak reference to the adapter so that dropping the last
/// `RestAdapter` handle terminates the loop instead of keeping it alive.
async fn refresh_loop(inner: Weak<AdapterInner>, cancel: CancellationToken) {
    loop {
        let wait = {
            let Some(strong) = inner.upgrade() else { return };
            let guard = strong.session.read().await;
            let Some(session) = guard.as_ref() else { return };
            (session.expires_at - Utc::now() - ChronoDuration::seconds(REFRESH_MARGIN_SECS))
                .to_std()
                .unwrap_or(Duration::ZERO)
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        let Some(strong) = inner.upgrade() else { return };
        let refresh_token = {
            let guard = strong.session.read().await;
            match guard.as_ref() {
                Some(session) => session.refresh_token.clone(),
                None => return,
            }
        };

        match strong.request_refresh(&refresh_token).await {
            Ok(fresh) => {
                let user = fresh.user.clone();
                *strong.session.write().await = Some(fresh);
                debug!(user_id = %user.id, "Session token rotated");
                let _ = strong.changes.send(SessionChange::TokenRefreshed(user));
            }
            Err(e) => {
                warn!("Session refresh failed, signing out: {e}");
                *strong.session.write().await = None;
                let _ = strong.changes.send(SessionChange::Expired);
                return;
            }
        }
    }
}

//=========================================================================================
// "Impure" Wire Record Structs
//=========================================================================================

#[derive(serde::Deserialize, Clone)]
struct UserRecord {
    id: Uuid,
    email: Option<String>,
    // Absent on some responses, null on others.
    #[serde(default)]
    user_metadata: Option<UserMetadata>,
}

#[derive(serde::Deserialize, Clone, Default)]
struct UserMetadata {
    username: Option<String>,
}

impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            email: self.email.unwrap_or_default(),
            username: self.user_metadata.and_then(|m| m.username),
        }
    }
}

#[derive(serde::Deserialize)]
struct TokenRecord {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: UserRecord,
}

impl TokenRecord {
    fn to_domain(self) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Utc::now() + ChronoDuration::seconds(self.expires_in),
            user: self.user.to_domain(),
        }
    }
}

#[derive(serde::Deserialize)]
struct TaskRecord {
    id: Uuid,
    title: String,
    #[serde(default)]
    description: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    user_id: Uuid,
}

impl TaskRecord {
    fn to_domain(self) -> PortResult<Task> {
        let status = TaskStatus::parse(&self.status).ok_or_else(|| {
            PortError::Backend(format!("Unrecognized task status '{}'", self.status))
        })?;
        Ok(Task {
            id: self.id,
            title: self.title,
            description: self.description.unwrap_or_default(),
            status,
            created_at: self.created_at,
            user_id: self.user_id,
        })
    }
}

#[derive(serde::Deserialize)]
struct ProfileRecord {
    email: String,
}

/// Only changed fields are serialized into the PATCH body.
#[derive(serde::Serialize)]
struct TaskPatchBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'a str>,
}

impl<'a> TaskPatchBody<'a> {
    fn from_patch(patch: &'a TaskPatch) -> Self {
        Self {
            title: patch.title.as_deref(),
            description: patch.description.as_deref(),
            status: patch.status.map(TaskStatus::as_str),
        }
    }
}

/// The error shapes the backend produces: the auth surface uses
/// `error`/`error_description` or `msg`, the table surface uses `message`.
#[derive(serde::Deserialize, Default)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

impl ErrorBody {
    fn into_message(self, status: StatusCode) -> String {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
            .unwrap_or_else(|| format!("Backend returned {status}"))
    }
}

fn transport_err(e: reqwest::Error) -> PortError {
    PortError::Backend(e.to_string())
}

fn decode_err(e: serde_json::Error) -> PortError {
    PortError::Backend(format!("Malformed backend response: {e}"))
}

async fn error_message(response: reqwest::Response) -> (StatusCode, String) {
    let status = response.status();
    let body = response.json::<ErrorBody>().await.unwrap_or_default();
    (status, body.into_message(status))
}

/// The table API answers writes with either a bare object or a one-element
/// array depending on the `Accept` negotiation; accept both.
fn single_record(value: serde_json::Value, context: &str) -> PortResult<TaskRecord> {
    let value = match value {
        serde_json::Value::Array(mut items) => {
            if items.is_empty() {
                return Err(PortError::NotFound(context.to_string()));
            }
            items.remove(0)
        }
        other => other,
    };
    serde_json::from_value(value).map_err(decode_err)
}

/// The signup endpoint answers with a full session when the account is
/// auto-confirmed, with a bare user when email verification is pending, and
/// with `{ "user": ..., "session": null }` on some backend versions.
fn parse_signup(value: serde_json::Value) -> PortResult<SignupOutcome> {
    if value.get("access_token").is_some() {
        let record: TokenRecord = serde_json::from_value(value).map_err(decode_err)?;
        return Ok(SignupOutcome::Authenticated(record.to_domain()));
    }
    if let Some(user) = value.get("user") {
        if user.is_null() {
            return Ok(SignupOutcome::ConfirmationPending(None));
        }
        let record: UserRecord = serde_json::from_value(user.clone()).map_err(decode_err)?;
        return Ok(SignupOutcome::ConfirmationPending(Some(record.to_domain())));
    }
    if value.get("id").is_some() {
        let record: UserRecord = serde_json::from_value(value).map_err(decode_err)?;
        return Ok(SignupOutcome::ConfirmationPending(Some(record.to_domain())));
    }
    Ok(SignupOutcome::ConfirmationPending(None))
}

//=========================================================================================
// `AuthService` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuthService for RestAdapter {
    async fn current_session(&self) -> PortResult<Option<Session>> {
        let cached = self.inner.session.read().await.clone();
        let Some(session) = cached else {
            return Ok(None);
        };
        if session.expires_at > Utc::now() {
            return Ok(Some(session));
        }

        // The cached session ran out; try one rotation before giving up.
        match self.inner.request_refresh(&session.refresh_token).await {
            Ok(fresh) => {
                let user = fresh.user.clone();
                self.adopt_session(fresh.clone(), SessionChange::TokenRefreshed(user))
                    .await;
                Ok(Some(fresh))
            }
            Err(e) => {
                warn!("Expired session could not be refreshed: {e}");
                self.drop_session().await;
                let _ = self.inner.changes.send(SessionChange::Expired);
                Err(PortError::Unauthorized)
            }
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> PortResult<Session> {
        let response = self
            .inner
            .http
            .post(self.inner.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(transport_err)?;

        if !response.status().is_success() {
            let (status, message) = error_message(response).await;
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                    PortError::InvalidCredentials
                }
                _ => PortError::Backend(message),
            });
        }

        let record: TokenRecord = response.json().await.map_err(transport_err)?;
        let session = record.to_domain();
        info!(user_id = %session.user.id, "Signed in");
        self.adopt_session(session.clone(), SessionChange::SignedIn(session.user.clone()))
            .await;
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: Option<&str>,
    ) -> PortResult<SignupOutcome> {
        let mut body = serde_json::json!({ "email": email, "password": password });
        if let Some(username) = username {
            body["data"] = serde_json::json!({ "username": username });
        }

        let response = self
            .inner
            .http
            .post(self.inner.auth_url("signup"))
            .json(&body)
            .send()
            .await
            .map_err(transport_err)?;

        if !response.status().is_success() {
            let (status, message) = error_message(response).await;
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    PortError::Registration(message)
                }
                _ => PortError::Backend(message),
            });
        }

        let value: serde_json::Value = response.json().await.map_err(transport_err)?;
        let outcome = parse_signup(value)?;
        if let SignupOutcome::Authenticated(session) = &outcome {
            info!(user_id = %session.user.id, "Signed up and authenticated");
            self.adopt_session(
                session.clone(),
                SessionChange::SignedIn(session.user.clone()),
            )
            .await;
        }
        Ok(outcome)
    }

    async fn sign_out(&self) -> PortResult<()> {
        let Ok(bearer) = self.bearer().await else {
            // Nothing to invalidate.
            return Ok(());
        };

        let response = self
            .inner
            .http
            .post(self.inner.auth_url("logout"))
            .bearer_auth(&bearer)
            .send()
            .await
            .map_err(transport_err)?;

        // 401 means the token was already dead server-side; treat the
        // sign-out as done rather than leaving a zombie session cached.
        if !response.status().is_success() && response.status() != StatusCode::UNAUTHORIZED {
            let (_, message) = error_message(response).await;
            return Err(PortError::Backend(message));
        }

        self.drop_session().await;
        let _ = self.inner.changes.send(SessionChange::SignedOut);
        info!("Signed out");
        Ok(())
    }

    async fn request_password_reset(&self, email: &str, redirect_to: &str) -> PortResult<()> {
        let response = self
            .inner
            .http
            .post(self.inner.auth_url("recover"))
            .query(&[("redirect_to", redirect_to)])
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await
            .map_err(transport_err)?;

        if !response.status().is_success() {
            let (status, message) = error_message(response).await;
            return Err(match status {
                StatusCode::NOT_FOUND => PortError::NotFound(message),
                _ => PortError::Backend(message),
            });
        }
        Ok(())
    }

    async fn exchange_recovery_token(&self, token: &str) -> PortResult<Session> {
        let response = self
            .inner
            .http
            .post(self.inner.auth_url("verify"))
            .json(&serde_json::json!({ "type": "recovery", "token": token }))
            .send()
            .await
            .map_err(transport_err)?;

        if !response.status().is_success() {
            let (_, message) = error_message(response).await;
            return Err(PortError::LinkInvalid(message));
        }

        let record: TokenRecord = response.json().await.map_err(transport_err)?;
        let session = record.to_domain();
        info!(user_id = %session.user.id, "Recovery token exchanged for scoped session");
        self.adopt_session(session.clone(), SessionChange::SignedIn(session.user.clone()))
            .await;
        Ok(session)
    }

    async fn update_credential(&self, new_password: &str) -> PortResult<()> {
        let bearer = self.bearer().await?;
        let response = self
            .inner
            .http
            .put(self.inner.auth_url("user"))
            .bearer_auth(&bearer)
            .json(&serde_json::json!({ "password": new_password }))
            .send()
            .await
            .map_err(transport_err)?;

        if !response.status().is_success() {
            let (status, message) = error_message(response).await;
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized,
                _ => PortError::Backend(message),
            });
        }
        Ok(())
    }

    fn subscribe_session_changes(&self) -> SessionChangeStream {
        let mut receiver = self.inner.changes.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(change) => yield change,
                    // A lagged subscriber only cares about the latest state
                    // anyway; skip ahead.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn resolve_username(&self, username: &str) -> PortResult<String> {
        let response = self
            .inner
            .http
            .get(self.inner.rest_url("profiles"))
            .query(&[
                ("select", "email".to_string()),
                ("username", format!("ilike.{username}")),
                ("limit", "1".to_string()),
            ])
            .send()
            .await
            .map_err(transport_err)?;

        if !response.status().is_success() {
            let (_, message) = error_message(response).await;
            return Err(PortError::Backend(message));
        }

        let profiles: Vec<ProfileRecord> = response.json().await.map_err(transport_err)?;
        profiles
            .into_iter()
            .next()
            .map(|p| p.email)
            .ok_or_else(|| PortError::NotFound(format!("No account named '{username}'")))
    }

    async fn create_profile(&self, user_id: Uuid, username: &str, email: &str) -> PortResult<()> {
        let mut request = self.inner.http.post(self.inner.rest_url("profiles")).json(
            &serde_json::json!({ "id": user_id, "username": username, "email": email }),
        );
        // A pending-confirmation signup has no session yet; the insert then
        // rides on the publishable key alone.
        if let Ok(bearer) = self.bearer().await {
            request = request.bearer_auth(bearer);
        }

        let response = request.send().await.map_err(transport_err)?;
        if !response.status().is_success() {
            let (_, message) = error_message(response).await;
            return Err(PortError::Backend(message));
        }
        Ok(())
    }
}

//=========================================================================================
// `TaskService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TaskService for RestAdapter {
    async fn list_tasks(&self, user_id: Uuid) -> PortResult<Vec<Task>> {
        let bearer = self.bearer().await?;
        let response = self
            .inner
            .http
            .get(self.inner.rest_url("tasks"))
            .bearer_auth(&bearer)
            .query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{user_id}")),
                ("order", "created_at.desc".to_string()),
            ])
            .send()
            .await
            .map_err(transport_err)?;

        if !response.status().is_success() {
            let (status, message) = error_message(response).await;
            return Err(table_error(status, message));
        }

        let records: Vec<TaskRecord> = response.json().await.map_err(transport_err)?;
        records.into_iter().map(TaskRecord::to_domain).collect()
    }

    async fn insert_task(&self, user_id: Uuid, new_task: NewTask) -> PortResult<Task> {
        let bearer = self.bearer().await?;
        let response = self
            .inner
            .http
            .post(self.inner.rest_url("tasks"))
            .bearer_auth(&bearer)
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({
                "title": new_task.title,
                "description": new_task.description,
                "status": new_task.status.as_str(),
                "user_id": user_id,
            }))
            .send()
            .await
            .map_err(transport_err)?;

        if !response.status().is_success() {
            let (status, message) = error_message(response).await;
            return Err(table_error(status, message));
        }

        let value: serde_json::Value = response.json().await.map_err(transport_err)?;
        single_record(value, "Inserted task row missing from response")?.to_domain()
    }

    async fn update_task(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        patch: TaskPatch,
    ) -> PortResult<Task> {
        let bearer = self.bearer().await?;
        let response = self
            .inner
            .http
            .patch(self.inner.rest_url("tasks"))
            .bearer_auth(&bearer)
            .header("Prefer", "return=representation")
            .query(&[
                ("id", format!("eq.{task_id}")),
                ("user_id", format!("eq.{user_id}")),
            ])
            .json(&TaskPatchBody::from_patch(&patch))
            .send()
            .await
            .map_err(transport_err)?;

        if !response.status().is_success() {
            let (status, message) = error_message(response).await;
            return Err(table_error(status, message));
        }

        // Zero matched rows means the id exists for another owner, or not at
        // all; either way the row filter refused the mutation.
        let value: serde_json::Value = response.json().await.map_err(transport_err)?;
        single_record(value, &format!("Task {task_id} not found"))?.to_domain()
    }

    async fn delete_task(&self, user_id: Uuid, task_id: Uuid) -> PortResult<()> {
        let bearer = self.bearer().await?;
        let response = self
            .inner
            .http
            .delete(self.inner.rest_url("tasks"))
            .bearer_auth(&bearer)
            .header("Prefer", "return=representation")
            .query(&[
                ("id", format!("eq.{task_id}")),
                ("user_id", format!("eq.{user_id}")),
            ])
            .send()
            .await
            .map_err(transport_err)?;

        if !response.status().is_success() {
            let (status, message) = error_message(response).await;
            return Err(table_error(status, message));
        }

        let deleted: Vec<TaskRecord> = response.json().await.map_err(transport_err)?;
        if deleted.is_empty() {
            return Err(PortError::NotFound(format!("Task {task_id} not found")));
        }
        Ok(())
    }
}

fn table_error(status: StatusCode, message: String) -> PortError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized,
        StatusCode::NOT_FOUND => PortError::NotFound(message),
        _ => PortError::Backend(message),
    }
}
