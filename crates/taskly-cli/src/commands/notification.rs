//! Notification history handlers

use anyhow::Result;

use taskly_core::Engine;

use crate::output::Output;
use crate::prompt::confirm;

pub async fn list(engine: &Engine, output: &Output) -> Result<()> {
    let notifications = engine.notifications().list().await?;
    output.print_notifications(&notifications);
    Ok(())
}

pub async fn clear(engine: &Engine, output: &Output) -> Result<()> {
    if output.should_prompt() && !confirm("Delete all notifications?")? {
        println!("Cancelled.");
        return Ok(());
    }

    let removed = engine.notifications().clear().await?;
    output.success(&format!("Deleted {} notification(s)", removed));
    Ok(())
}
