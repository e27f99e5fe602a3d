//! Authentication state
//!
//! [`AuthSession`] answers "is a user signed in, and who" for the sync
//! coordinators. While offline the persisted signed-in flag is trusted so the
//! app keeps working; while online the token is verified with the provider
//! and a rejected token signs the user out locally.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::credentials::CredentialStore;
use super::gate::AuthGate;
use super::provider::{AuthError, TokenProvider};
use crate::connectivity::ConnectivityMonitor;

/// Session lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    LoggedIn { user_id: String },
    /// Any logout, voluntary or not
    LoggedOut { user_id: Option<String> },
    /// Another device took over the session
    ForcedLogoutDetected { user_id: Option<String> },
}

/// What the coordinators need to know about authentication
#[async_trait]
pub trait AuthState: Send + Sync {
    async fn is_authenticated(&self) -> bool;

    fn current_user_id(&self) -> Option<String>;

    /// User of the most recent session, kept after logout for offline viewing
    fn last_known_user_id(&self) -> Option<String>;

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Called with the user id after the provider rejected a stored session
pub type RejectionHook = Arc<dyn Fn(&str) + Send + Sync>;

pub struct AuthSession {
    credentials: Mutex<CredentialStore>,
    provider: Arc<dyn TokenProvider>,
    connectivity: ConnectivityMonitor,
    gate: AuthGate,
    events: broadcast::Sender<AuthEvent>,
    on_rejected: Mutex<Option<RejectionHook>>,
}

impl AuthSession {
    pub fn new(
        credentials: CredentialStore,
        provider: Arc<dyn TokenProvider>,
        connectivity: ConnectivityMonitor,
        gate_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            credentials: Mutex::new(credentials),
            provider,
            connectivity,
            gate: AuthGate::new(gate_timeout),
            events,
            on_rejected: Mutex::new(None),
        }
    }

    /// Run `hook` whenever an online verification rejects the stored session,
    /// after local credentials are cleared and before `LoggedOut` is emitted
    pub fn on_session_rejected(&self, hook: RejectionHook) {
        *self.on_rejected.lock().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    fn creds(&self) -> MutexGuard<'_, CredentialStore> {
        self.credentials.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persisted signed-in flag, without verification
    pub fn is_signed_in(&self) -> bool {
        self.creds().credentials().logged_in
    }

    pub fn id_token(&self) -> Option<String> {
        self.creds().credentials().id_token.clone()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn emit(&self, event: AuthEvent) {
        debug!(?event, "Auth event");
        let _ = self.events.send(event);
    }

    /// Store a new session
    ///
    /// Online, the token is verified first and a rejected token fails the
    /// sign-in. An unreachable provider does not block it.
    pub async fn sign_in(
        &self,
        user_id: &str,
        id_token: String,
        refresh_token: Option<String>,
    ) -> Result<(), AuthError> {
        let _gate = self.gate.acquire().await;

        if self.connectivity.is_connected() {
            match self.provider.verify(user_id, &id_token).await {
                Ok(true) => {}
                Ok(false) => return Err(AuthError::TokenRejected(user_id.to_string())),
                Err(e) => warn!(user_id, error = %e, "Could not verify token, accepting sign-in"),
            }
        }

        let mut creds = self.creds();
        creds.sign_in(user_id, id_token, refresh_token);
        creds.save()?;
        info!(user_id, "Signed in");
        Ok(())
    }

    /// End the session: revoke tokens when online, clear local flags
    ///
    /// Returns the user that was signed in.
    pub async fn sign_out(&self) -> Option<String> {
        let user_id = {
            let _gate = self.gate.acquire().await;
            let user_id = self.current_user_id();

            if let Some(user) = user_id.as_deref() {
                if self.connectivity.is_connected() {
                    if let Err(e) = self.provider.revoke(user).await {
                        warn!(user_id = user, error = %e, "Token revocation failed");
                    }
                }
            }

            self.clear_local();
            user_id
        };

        info!(user_id = ?user_id, "Signed out");
        self.emit(AuthEvent::LoggedOut {
            user_id: user_id.clone(),
        });
        user_id
    }

    /// Issue a fresh id token and persist it
    pub async fn refresh_token(&self) -> Result<String, AuthError> {
        let (user_id, refresh) = {
            let creds = self.creds();
            let c = creds.credentials();
            match (c.logged_in, c.user_id.clone()) {
                (true, Some(user)) => (user, c.refresh_token.clone()),
                _ => return Err(AuthError::NotAuthenticated),
            }
        };

        let token = self.provider.refresh(&user_id, refresh.as_deref()).await?;

        let mut creds = self.creds();
        creds.set_id_token(token.clone());
        creds.save()?;
        debug!(user_id, "Token refreshed");
        Ok(token)
    }

    fn clear_local(&self) {
        let mut creds = self.creds();
        creds.clear_session();
        if let Err(e) = creds.save() {
            warn!(error = %e, "Failed to persist cleared credentials");
        }
    }
}

#[async_trait]
impl AuthState for AuthSession {
    async fn is_authenticated(&self) -> bool {
        let _gate = self.gate.acquire().await;

        let (user_id, token) = {
            let creds = self.creds();
            let c = creds.credentials();
            match (c.logged_in, c.user_id.clone()) {
                (true, Some(user)) => (user, c.id_token.clone().unwrap_or_default()),
                _ => return false,
            }
        };

        // Offline: keep the persisted session so offline access continues
        if !self.connectivity.is_connected() {
            return true;
        }

        match self.provider.verify(&user_id, &token).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(user_id, "Session rejected by provider, signing out locally");
                self.clear_local();
                let hook = self
                    .on_rejected
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                if let Some(hook) = hook {
                    hook(&user_id);
                }
                self.emit(AuthEvent::LoggedOut {
                    user_id: Some(user_id),
                });
                false
            }
            Err(e) => {
                debug!(user_id, error = %e, "Provider unreachable, trusting stored session");
                true
            }
        }
    }

    fn current_user_id(&self) -> Option<String> {
        let creds = self.creds();
        let c = creds.credentials();
        if c.logged_in {
            c.user_id.clone()
        } else {
            None
        }
    }

    fn last_known_user_id(&self) -> Option<String> {
        let creds = self.creds();
        let c = creds.credentials();
        c.user_id.clone().or_else(|| c.last_user_id.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
