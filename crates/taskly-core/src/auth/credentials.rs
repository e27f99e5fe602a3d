//! Persisted session credentials
//!
//! Keeps the signed-in flag, tokens and the last known user id between runs
//! so the app stays usable offline. Logging out clears everything except
//! `last_user_id`, which offline listing falls back to.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub last_user_id: Option<String>,
}

/// Credentials with optional file persistence
#[derive(Debug, Default)]
pub struct CredentialStore {
    credentials: Credentials,
    path: Option<PathBuf>,
}

impl CredentialStore {
    /// In-memory only
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist to `path`, loading what is already there
    pub fn with_path(path: PathBuf) -> Result<Self> {
        let mut store = Self {
            credentials: Credentials::default(),
            path: Some(path.clone()),
        };

        if path.exists() {
            store.load()?;
        }

        Ok(store)
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Record a successful sign-in
    pub fn sign_in(&mut self, user_id: &str, id_token: String, refresh_token: Option<String>) {
        self.credentials = Credentials {
            logged_in: true,
            user_id: Some(user_id.to_string()),
            id_token: Some(id_token),
            refresh_token,
            last_user_id: Some(user_id.to_string()),
        };
    }

    pub fn set_id_token(&mut self, id_token: String) {
        self.credentials.id_token = Some(id_token);
    }

    /// Drop the session, keeping `last_user_id`
    pub fn clear_session(&mut self) {
        let last_user_id = self
            .credentials
            .user_id
            .take()
            .or_else(|| self.credentials.last_user_id.take());
        self.credentials = Credentials {
            last_user_id,
            ..Credentials::default()
        };
    }

    pub fn save(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(&self.credentials).context("Failed to serialize credentials")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write credentials to {:?}", path))?;
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials from {:?}", path))?;
        self.credentials = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse credentials in {:?}", path))?;
        Ok(())
    }
}
