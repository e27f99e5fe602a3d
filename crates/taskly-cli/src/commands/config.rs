//! Config command handlers

use anyhow::{bail, Context, Result};

use taskly_core::Config;

use crate::output::{Output, OutputFormat};

const KEYS: &str = "data_dir, remote_url, auto_sync, device_id, connectivity_interval_secs, \
                    token_refresh_interval_secs, notification_limit";

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => output.json(&config),
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:                    {}", config.data_dir.display());
            println!(
                "  remote_url:                  {}",
                config.remote_url.as_deref().unwrap_or("(not set)")
            );
            println!("  auto_sync:                   {}", config.auto_sync);
            println!(
                "  device_id:                   {}",
                config.device_id.as_deref().unwrap_or("(generated)")
            );
            println!(
                "  connectivity_interval_secs:  {}",
                config.connectivity_interval_secs
            );
            println!(
                "  token_refresh_interval_secs: {}",
                config.token_refresh_interval_secs
            );
            println!("  notification_limit:          {}", config.notification_limit);
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Apply `key = value` to `config`
pub(crate) fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let optional = |value: &str| {
        if value.is_empty() || value == "none" {
            None
        } else {
            Some(value.to_string())
        }
    };

    match key {
        "data_dir" => config.data_dir = value.into(),
        "remote_url" => config.remote_url = optional(value),
        "auto_sync" => {
            config.auto_sync = value
                .parse()
                .context("Invalid value for auto_sync. Use 'true' or 'false'.")?;
        }
        "device_id" => config.device_id = optional(value),
        "connectivity_interval_secs" => {
            config.connectivity_interval_secs =
                value.parse().context("Expected a number of seconds")?;
        }
        "token_refresh_interval_secs" => {
            config.token_refresh_interval_secs =
                value.parse().context("Expected a number of seconds")?;
        }
        "notification_limit" => {
            config.notification_limit = value.parse().context("Expected a count")?;
        }
        _ => bail!(
            "Unknown configuration key: '{}'\nValid keys: {}",
            key,
            KEYS
        ),
    }
    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;
    config.save().context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_keys() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_data_dir(dir.path());

        apply(&mut config, "remote_url", "https://sync.example.com").unwrap();
        apply(&mut config, "auto_sync", "false").unwrap();
        apply(&mut config, "notification_limit", "25").unwrap();
        assert_eq!(config.remote_url.as_deref(), Some("https://sync.example.com"));
        assert!(!config.auto_sync);
        assert_eq!(config.notification_limit, 25);

        apply(&mut config, "remote_url", "none").unwrap();
        assert!(config.remote_url.is_none());

        assert!(apply(&mut config, "auto_sync", "maybe").is_err());
        assert!(apply(&mut config, "favorite_color", "blue").is_err());
    }

    #[test]
    fn test_saved_config_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::with_data_dir(dir.path());
        apply(&mut config, "device_id", "laptop").unwrap();
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.device_id.as_deref(), Some("laptop"));
    }
}
