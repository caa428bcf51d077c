//! services/client/src/store/recovery.rs
//!
//! The password-reset completion flow, entered only through the callback URL
//! delivered by the reset email.
//!
//! The flow is an explicit state machine:
//!
//! ```text
//! Validating -> LinkValid | LinkInvalid
//! LinkValid  -> Submitting -> Succeeded | Failed
//! Failed     -> Submitting (retry)
//! ```
//!
//! The password can never be submitted before the link validation completed,
//! and a successful change immediately discards the scoped session so the
//! one-time token cannot be reused.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use taskdeck_core::ports::AuthService;
use taskdeck_core::validate::{self, ValidationError};

/// How long the confirmation message stays up before the shell redirects to
/// the login entry point.
pub const REDIRECT_DELAY: Duration = Duration::from_secs(2);

/// Where the flow currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryState {
    /// The recovery token is being exchanged for a scoped session.
    Validating,
    /// The scoped session is established; a new password may be submitted.
    LinkValid,
    /// The token was expired, malformed or already used. Terminal.
    LinkInvalid(String),
    /// A credential update is in flight.
    Submitting,
    /// The password was changed and the scoped session discarded. Terminal.
    Succeeded,
    /// The backend refused the update; the form stays available for retry.
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Invalid or expired reset link. Please request a new one.")]
    LinkInvalid,
    #[error("The reset link has not been validated yet")]
    NotReady,
    #[error("The password was already reset")]
    AlreadyComplete,
    #[error("{0}")]
    Backend(String),
}

pub struct RecoveryFlow {
    gateway: Arc<dyn AuthService>,
    state: watch::Sender<RecoveryState>,
}

impl RecoveryFlow {
    pub fn new(gateway: Arc<dyn AuthService>) -> Self {
        let (state, _) = watch::channel(RecoveryState::Validating);
        Self { gateway, state }
    }

    pub fn state(&self) -> RecoveryState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecoveryState> {
        self.state.subscribe()
    }

    /// Exchanges the recovery token from the callback URL for a session
    /// scoped to the password change.
    ///
    /// Every failure lands in [`RecoveryState::LinkInvalid`]; the password
    /// form must never be shown from there. A fresh token (a re-requested
    /// email) may be validated again on the same flow.
    pub async fn begin(&self, recovery_token: &str) -> Result<(), FlowError> {
        self.state.send_replace(RecoveryState::Validating);

        match self.gateway.exchange_recovery_token(recovery_token).await {
            Ok(_session) => {
                info!("Recovery link validated");
                self.state.send_replace(RecoveryState::LinkValid);
                Ok(())
            }
            Err(e) => {
                warn!("Recovery link rejected: {e}");
                self.state.send_replace(RecoveryState::LinkInvalid(e.to_string()));
                Err(FlowError::LinkInvalid)
            }
        }
    }

    /// Updates the credential through the scoped session, then signs that
    /// session out so the one-time token is dead either way.
    ///
    /// Local validation failures (empty fields, short password, mismatched
    /// confirmation) are reported without a network call and leave the flow
    /// submittable.
    pub async fn submit(&self, new_password: &str, confirmation: &str) -> Result<(), FlowError> {
        match self.state() {
            RecoveryState::LinkValid | RecoveryState::Failed(_) => {}
            RecoveryState::Validating | RecoveryState::Submitting => {
                return Err(FlowError::NotReady)
            }
            RecoveryState::LinkInvalid(_) => return Err(FlowError::LinkInvalid),
            RecoveryState::Succeeded => return Err(FlowError::AlreadyComplete),
        }

        validate::check_new_password(new_password, confirmation)?;

        self.state.send_replace(RecoveryState::Submitting);
        match self.gateway.update_credential(new_password).await {
            Ok(()) => {
                if let Err(e) = self.gateway.sign_out().await {
                    // The password did change; the leftover scoped session
                    // only shortens to its natural expiry.
                    warn!("Could not discard the scoped session: {e}");
                }
                info!("Password reset completed");
                self.state.send_replace(RecoveryState::Succeeded);
                Ok(())
            }
            Err(e) => {
                warn!("Password update failed: {e}");
                let message = e.to_string();
                self.state.send_replace(RecoveryState::Failed(message.clone()));
                Err(FlowError::Backend(message))
            }
        }
    }
}
