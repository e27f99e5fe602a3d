//! Login and logout handlers

use anyhow::{Context, Result};
use taskly_core::{Engine, Notification, NotificationType};

use crate::output::Output;

/// Sign in as `user_id` on this device
///
/// Any other device signed in to the account is logged out by its session
/// watch. Rows created while signed out are claimed for the account.
pub async fn login(
    engine: &Engine,
    user_id: String,
    token: String,
    refresh_token: Option<String>,
    output: &Output,
) -> Result<()> {
    if engine.config().remote_url.is_none() {
        output.message("No remote configured; data stays on this device.");
    }

    engine
        .login(&user_id, token, refresh_token)
        .await
        .context("Login failed")?;

    engine
        .notifications()
        .add(
            Notification::new(format!("Signed in as {}", user_id), NotificationType::Success),
            false,
        )
        .await?;

    output.success(&format!("Signed in as {}", user_id));
    if engine.sessions().is_registration_pending() {
        output.message("Could not claim the session for this device; log in again once online.");
    }
    Ok(())
}

pub async fn logout(engine: &Engine, output: &Output) -> Result<()> {
    match engine.logout().await {
        Some(user_id) => output.success(&format!("Signed out {}", user_id)),
        None => output.message("Not signed in."),
    }
    Ok(())
}
