//! Status command handler

use anyhow::Result;

use taskly_core::Engine;

use crate::output::{Output, OutputFormat};

/// Show status information
pub async fn show(engine: &Engine, output: &Output) -> Result<()> {
    let status = engine.status().await?;
    let config = engine.config();

    match output.format {
        OutputFormat::Json => {
            let pending: serde_json::Map<String, serde_json::Value> = status
                .pending
                .iter()
                .map(|(kind, count)| (kind.to_string(), (*count).into()))
                .collect();
            output.json(&serde_json::json!({
                "device_id": status.device_id,
                "remote_url": status.remote_url,
                "online": status.online,
                "signed_in": status.signed_in,
                "user_id": status.user_id,
                "last_user_id": status.last_user_id,
                "auto_sync": status.auto_sync,
                "pending": pending,
                "data_dir": config.data_dir
            }));
        }
        OutputFormat::Quiet => {
            println!("{}", status.device_id);
        }
        OutputFormat::Human => {
            println!("Taskly Status");
            println!("=============");
            println!();
            println!("Device:");
            println!("  ID:       {}", status.device_id);
            println!("  Data:     {}", config.data_dir.display());
            println!();
            println!("Session:");
            match (&status.user_id, status.signed_in) {
                (Some(user), true) => println!("  Signed in as {}", user),
                _ => {
                    println!("  Signed out");
                    if let Some(ref last) = status.last_user_id {
                        println!("  Last user: {}", last);
                    }
                }
            }
            println!();
            println!("Sync:");
            println!(
                "  Remote:    {}",
                status.remote_url.as_deref().unwrap_or("(not set, local only)")
            );
            println!(
                "  Network:   {}",
                if status.online { "online" } else { "offline" }
            );
            println!(
                "  Auto sync: {}",
                if status.auto_sync { "enabled" } else { "disabled" }
            );
            println!("  Pending:   {}", status.total_pending());
            for (kind, count) in status.pending.iter().filter(|(_, n)| *n > 0) {
                println!("    {}: {}", kind, count);
            }
        }
    }

    Ok(())
}
