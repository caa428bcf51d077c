//! services/client/src/store/auth.rs
//!
//! The process-wide source of truth for "who is logged in".
//!
//! State is published as immutable [`AuthSnapshot`] values through a `watch`
//! channel; readers subscribe and never touch the store's internals. The one
//! external mutation path is the backend's session-change stream, consumed by
//! a listener task that [`AuthStore::initialize`] spawns.

use futures::StreamExt;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskdeck_core::domain::{SessionChange, SignupOutcome, User};
use taskdeck_core::ports::{AuthService, PortError};
use taskdeck_core::validate::{self, ValidationError};

/// The confirmation shown after a reset request, registered address or not.
pub const RESET_CONFIRMATION: &str = "Password reset email sent! Check your inbox.";

/// An immutable view of the authentication state.
#[derive(Debug, Clone, Default)]
pub struct AuthSnapshot {
    pub user: Option<User>,
    /// True while the initial session check or a credential operation is
    /// outstanding.
    pub loading: bool,
    /// The last surfaced failure, kept for display until the next operation.
    pub last_error: Option<String>,
}

impl AuthSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Errors surfaced by the auth store operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// One uniform message whether the identifier lookup or the password
    /// check failed.
    #[error("Invalid username or password")]
    InvalidCredentials,
    /// The backend's registration refusal, verbatim.
    #[error("{0}")]
    Registration(String),
    #[error("Logout failed: {0}")]
    SignOut(String),
    #[error("Reset password email failed. Please try again.")]
    ResetRequestFailed,
    #[error("{0}")]
    Backend(String),
}

pub struct AuthStore {
    gateway: Arc<dyn AuthService>,
    reset_redirect_url: String,
    state: Arc<watch::Sender<AuthSnapshot>>,
    listener: StdMutex<Option<JoinHandle<()>>>,
}

impl AuthStore {
    pub fn new(gateway: Arc<dyn AuthService>, reset_redirect_url: impl Into<String>) -> Self {
        let initial = AuthSnapshot {
            user: None,
            loading: true,
            last_error: None,
        };
        let (state, _) = watch::channel(initial);
        Self {
            gateway,
            reset_redirect_url: reset_redirect_url.into(),
            state: Arc::new(state),
            listener: StdMutex::new(None),
        }
    }

    /// The current state as an owned snapshot.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    /// Hands out a receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    pub(crate) fn current_user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    /// Checks for an existing backend session and registers the persistent
    /// session-change subscription.
    ///
    /// Called once at boot. The subscription overwrites the current user
    /// whenever the backend reports a change (sign-in elsewhere, token
    /// refresh, expiry); the most recent event is authoritative.
    pub async fn initialize(&self) {
        self.state.send_modify(|s| {
            s.loading = true;
            s.last_error = None;
        });

        match self.gateway.current_session().await {
            Ok(Some(session)) => {
                info!(user_id = %session.user.id, "Restored existing session");
                self.state.send_modify(|s| {
                    s.user = Some(session.user);
                    s.loading = false;
                });
            }
            Ok(None) => {
                self.state.send_modify(|s| {
                    s.user = None;
                    s.loading = false;
                });
            }
            Err(e) => {
                warn!("Auth check failed: {e}");
                self.state.send_modify(|s| {
                    s.user = None;
                    s.last_error = Some(e.to_string());
                    s.loading = false;
                });
            }
        }

        let mut changes = self.gateway.subscribe_session_changes();
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            while let Some(change) = changes.next().await {
                state.send_modify(|s| {
                    match change {
                        SessionChange::SignedIn(user)
                        | SessionChange::TokenRefreshed(user) => s.user = Some(user),
                        SessionChange::SignedOut | SessionChange::Expired => s.user = None,
                    }
                    s.loading = false;
                });
            }
        });
        // The handle is aborted on drop so a torn-down store never has its
        // state written to from the listener.
        if let Some(previous) = self
            .listener
            .lock()
            .expect("listener guard poisoned")
            .replace(handle)
        {
            previous.abort();
        }
    }

    /// Signs in with an email, or with a display name that is first resolved
    /// to its registered email.
    ///
    /// Concurrent calls are not coordinated; the last completed write to the
    /// snapshot wins.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<(), AuthError> {
        self.state.send_modify(|s| {
            s.loading = true;
            s.last_error = None;
        });

        let email = if identifier.contains('@') {
            identifier.to_string()
        } else {
            match self.gateway.resolve_username(identifier).await {
                Ok(email) => email,
                Err(e) => {
                    // Deliberately indistinguishable from a wrong password.
                    debug!("Identifier lookup failed: {e}");
                    return Err(self.record_failure(AuthError::InvalidCredentials));
                }
            }
        };

        match self.gateway.sign_in_with_password(&email, secret).await {
            Ok(session) => {
                self.state.send_modify(|s| {
                    s.user = Some(session.user);
                    s.loading = false;
                });
                Ok(())
            }
            Err(PortError::InvalidCredentials) => {
                Err(self.record_failure(AuthError::InvalidCredentials))
            }
            Err(e) => Err(self.record_failure(AuthError::Backend(e.to_string()))),
        }
    }

    /// Registers a new account. The outcome reports whether the backend
    /// authenticated the user immediately or parked the account until the
    /// verification email is confirmed.
    pub async fn signup(
        &self,
        email: &str,
        secret: &str,
        username: &str,
    ) -> Result<SignupOutcome, AuthError> {
        validate::check_signup_fields(email, secret, username)?;

        self.state.send_modify(|s| {
            s.loading = true;
            s.last_error = None;
        });

        let outcome = match self.gateway.sign_up(email, secret, Some(username)).await {
            Ok(outcome) => outcome,
            Err(PortError::Registration(message)) => {
                return Err(self.record_failure(AuthError::Registration(message)));
            }
            Err(e) => return Err(self.record_failure(AuthError::Backend(e.to_string()))),
        };

        let created_user = match &outcome {
            SignupOutcome::Authenticated(session) => Some(session.user.clone()),
            SignupOutcome::ConfirmationPending(user) => user.clone(),
        };
        if let Some(user) = created_user {
            if let Err(e) = self.gateway.create_profile(user.id, username, email).await {
                // The account exists either way; the profile row is best-effort.
                warn!(user_id = %user.id, "Profile not created: {e}");
            }
        }

        self.state.send_modify(|s| {
            if let SignupOutcome::Authenticated(session) = &outcome {
                s.user = Some(session.user.clone());
            }
            s.loading = false;
        });
        Ok(outcome)
    }

    /// Invalidates the backend session and clears the current user. On
    /// failure the state is left unchanged.
    pub async fn logout(&self) -> Result<(), AuthError> {
        match self.gateway.sign_out().await {
            Ok(()) => {
                self.state.send_modify(|s| {
                    s.user = None;
                    s.last_error = None;
                });
                Ok(())
            }
            Err(e) => Err(self.record_failure(AuthError::SignOut(e.to_string()))),
        }
    }

    /// Asks the backend to dispatch a reset email linking back to the
    /// configured callback URL.
    pub async fn request_password_reset(&self, email: &str) -> Result<&'static str, AuthError> {
        if email.trim().is_empty() {
            return Err(ValidationError::MissingField("Email").into());
        }
        self.state.send_modify(|s| s.last_error = None);

        match self
            .gateway
            .request_password_reset(email, &self.reset_redirect_url)
            .await
        {
            // An unknown address reads exactly like success so this endpoint
            // cannot be used to probe which emails are registered.
            Ok(()) | Err(PortError::NotFound(_)) => {
                info!("Reset password email dispatched");
                Ok(RESET_CONFIRMATION)
            }
            Err(e) => {
                warn!("Reset password email failed: {e}");
                Err(self.record_failure(AuthError::ResetRequestFailed))
            }
        }
    }

    fn record_failure(&self, error: AuthError) -> AuthError {
        let message = error.to_string();
        self.state.send_modify(|s| {
            s.loading = false;
            s.last_error = Some(message);
        });
        error
    }
}

impl Drop for AuthStore {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.listener.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
