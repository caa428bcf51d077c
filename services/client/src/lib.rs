//! services/client/src/lib.rs
//!
//! The client core of the to-do application: the auth session store, the
//! task list controller, the password-reset completion flow, and the REST
//! gateway adapter to the hosted backend. A rendering shell embeds [`App`]
//! and subscribes to the stores; everything here is presentation-free.

pub mod adapters;
pub mod config;
pub mod error;
pub mod store;

pub use config::Config;
pub use error::ClientError;

use std::sync::Arc;

use adapters::rest::RestAdapter;
use store::auth::AuthStore;
use store::recovery::RecoveryFlow;
use store::tasks::TaskController;

/// The wired-together client core, created once at application boot.
pub struct App {
    pub gateway: Arc<RestAdapter>,
    pub auth: Arc<AuthStore>,
    pub tasks: Arc<TaskController>,
}

impl App {
    /// Builds the gateway and the stores from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let gateway = Arc::new(RestAdapter::new(config)?);
        let auth = Arc::new(AuthStore::new(
            gateway.clone(),
            config.reset_redirect_url.clone(),
        ));
        let tasks = Arc::new(TaskController::new(gateway.clone(), auth.clone()));
        Ok(Self {
            gateway,
            auth,
            tasks,
        })
    }

    /// A fresh recovery flow for a visit to the reset callback URL.
    pub fn recovery_flow(&self) -> RecoveryFlow {
        RecoveryFlow::new(self.gateway.clone())
    }
}

/// Installs the global tracing subscriber. The shell calls this once at boot,
/// before building the [`App`].
pub fn init_tracing(level: tracing::Level) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
