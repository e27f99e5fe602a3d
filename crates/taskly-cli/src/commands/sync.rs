//! Sync command handler

use anyhow::{bail, Result};

use taskly_core::Engine;

use crate::output::Output;

/// Push pending changes, then pull the account's data
pub async fn sync(engine: &Engine, output: &Output) -> Result<()> {
    if engine.config().remote_url.is_none() {
        bail!(
            "Remote not configured. Set it with:\n  \
             taskly config set remote_url https://your-server"
        );
    }

    output.message("Synchronizing...");

    let Some(report) = engine.sync_now().await else {
        bail!("Not signed in. Run `taskly login <user-id> --token <token>` first.");
    };

    if !engine.connectivity().is_connected() {
        output.message("Remote unreachable; changes stay queued on this device.");
    }

    if output.is_json() {
        output.json(&serde_json::json!({
            "claimed": report.claimed,
            "pushed": report.pushed,
            "pulled": report.pulled,
            "failed": report.failed
        }));
        return Ok(());
    }

    output.success(&format!(
        "Sync complete - pushed {}, pulled {}, claimed {}",
        report.pushed, report.pulled, report.claimed
    ));
    if report.failed > 0 {
        output.message(&format!("  {} row(s) failed and stay pending", report.failed));
    }
    Ok(())
}
