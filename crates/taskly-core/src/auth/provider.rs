//! Identity provider contract

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Not signed in")]
    NotAuthenticated,

    /// Token expired, revoked or the account is disabled
    #[error("Credentials rejected for user '{0}'")]
    TokenRejected(String),

    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error(transparent)]
    Persist(#[from] anyhow::Error),
}

/// Issues, verifies and revokes tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// `Ok(false)` when the provider rejects the token or the account
    async fn verify(&self, user_id: &str, id_token: &str) -> Result<bool, AuthError>;

    /// Issue a fresh id token
    async fn refresh(&self, user_id: &str, refresh_token: Option<&str>) -> Result<String, AuthError>;

    /// Revoke every token of the user
    async fn revoke(&self, user_id: &str) -> Result<(), AuthError>;
}

/// Provider that trusts any non-empty token
///
/// Used when the remote service validates bearer tokens itself. Accounts can
/// be marked rejected and the provider taken offline for testing.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    rejected: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
    refreshes: AtomicUsize,
    revocations: AtomicUsize,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, user_id: &str) {
        self.rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn revocation_count(&self) -> usize {
        self.revocations.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), AuthError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::ProviderUnavailable("provider offline".into()));
        }
        Ok(())
    }

    fn is_rejected(&self, user_id: &str) -> bool {
        self.rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(user_id)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn verify(&self, user_id: &str, id_token: &str) -> Result<bool, AuthError> {
        self.check_available()?;
        Ok(!id_token.is_empty() && !self.is_rejected(user_id))
    }

    async fn refresh(&self, user_id: &str, _refresh_token: Option<&str>) -> Result<String, AuthError> {
        self.check_available()?;
        if self.is_rejected(user_id) {
            return Err(AuthError::TokenRejected(user_id.to_string()));
        }
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{user_id}.{}", Uuid::new_v4().simple()))
    }

    async fn revoke(&self, _user_id: &str) -> Result<(), AuthError> {
        self.check_available()?;
        self.revocations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
