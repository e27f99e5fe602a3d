//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/taskly/config.toml)
//! 3. Environment variables (TASKLY_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "TASKLY";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory for local data (SQLite db, device id, credentials)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the remote document service; unset means local-only
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Whether login and reconnect trigger synchronization automatically
    #[serde(default = "default_true")]
    pub auto_sync: bool,

    /// Fixed device id instead of the generated one
    #[serde(default)]
    pub device_id: Option<String>,

    /// Reachability polling period
    #[serde(default = "default_connectivity_interval")]
    pub connectivity_interval_secs: u64,

    /// Token refresh period (55 minutes)
    #[serde(default = "default_token_refresh_interval")]
    pub token_refresh_interval_secs: u64,

    /// How long a caller waits on the auth gate before forcing it open
    #[serde(default = "default_auth_wait_timeout")]
    pub auth_wait_timeout_ms: u64,

    #[serde(default = "default_store_open_retries")]
    pub store_open_retries: u32,

    #[serde(default = "default_store_retry_delay")]
    pub store_retry_delay_ms: u64,

    /// Maximum notifications kept locally
    #[serde(default = "default_notification_limit")]
    pub notification_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            remote_url: None,
            auto_sync: true,
            device_id: None,
            connectivity_interval_secs: default_connectivity_interval(),
            token_refresh_interval_secs: default_token_refresh_interval(),
            auth_wait_timeout_ms: default_auth_wait_timeout(),
            store_open_retries: default_store_open_retries(),
            store_retry_delay_ms: default_store_retry_delay(),
            notification_limit: default_notification_limit(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (TASKLY_DATA_DIR, TASKLY_REMOTE_URL, TASKLY_AUTO_SYNC, TASKLY_DEVICE_ID)
    /// 2. Config file (~/.config/taskly/config.toml or TASKLY_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Configuration rooted at `data_dir`, everything else default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // Empty string clears the remote
        if let Ok(val) = std::env::var(format!("{}_REMOTE_URL", ENV_PREFIX)) {
            self.remote_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_AUTO_SYNC", ENV_PREFIX)) {
            self.auto_sync = val.eq_ignore_ascii_case("true") || val == "1";
        }

        if let Ok(val) = std::env::var(format!("{}_DEVICE_ID", ENV_PREFIX)) {
            self.device_id = if val.is_empty() { None } else { Some(val) };
        }
    }

    /// Ensure data directory exists
    pub fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with TASKLY_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("taskly")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("taskly.db")
    }

    /// Get the path to the persisted device id
    pub fn device_id_path(&self) -> PathBuf {
        self.data_dir.join("device_id")
    }

    /// Get the path to the persisted session credentials
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }

    pub fn connectivity_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity_interval_secs.max(1))
    }

    pub fn token_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.token_refresh_interval_secs.max(1))
    }

    pub fn auth_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_wait_timeout_ms)
    }

    pub fn store_retry_delay(&self) -> Duration {
        Duration::from_millis(self.store_retry_delay_ms)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskly")
}

fn default_true() -> bool {
    true
}

fn default_connectivity_interval() -> u64 {
    5
}

fn default_token_refresh_interval() -> u64 {
    55 * 60
}

fn default_auth_wait_timeout() -> u64 {
    5000
}

fn default_store_open_retries() -> u32 {
    3
}

fn default_store_retry_delay() -> u64 {
    200
}

fn default_notification_limit() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "TASKLY_DATA_DIR",
        "TASKLY_REMOTE_URL",
        "TASKLY_AUTO_SYNC",
        "TASKLY_DEVICE_ID",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.auto_sync);
        assert!(config.remote_url.is_none());
        assert!(config.data_dir.ends_with("taskly"));
        assert_eq!(config.connectivity_interval(), Duration::from_secs(5));
        assert_eq!(config.token_refresh_interval(), Duration::from_secs(3300));
        assert_eq!(config.auth_wait_timeout(), Duration::from_millis(5000));
        assert_eq!(config.store_open_retries, 3);
        assert_eq!(config.notification_limit, 100);
    }

    #[test]
    fn test_file_paths() {
        let config = Config::with_data_dir("/data/taskly");
        assert_eq!(config.database_path(), PathBuf::from("/data/taskly/taskly.db"));
        assert!(config.device_id_path().ends_with("device_id"));
        assert!(config.credentials_path().ends_with("credentials.json"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("TASKLY_DATA_DIR", "/tmp/taskly-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/taskly-test"));
    }

    #[test]
    fn test_env_override_auto_sync() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("TASKLY_AUTO_SYNC", "false");
        config.apply_env_overrides();
        assert!(!config.auto_sync);

        env::set_var("TASKLY_AUTO_SYNC", "1");
        config.apply_env_overrides();
        assert!(config.auto_sync);
    }

    #[test]
    fn test_env_override_remote_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("TASKLY_REMOTE_URL", "https://api.example.com");
        config.apply_env_overrides();
        assert_eq!(config.remote_url.as_deref(), Some("https://api.example.com"));

        env::set_var("TASKLY_REMOTE_URL", "");
        config.apply_env_overrides();
        assert!(config.remote_url.is_none());
    }

    #[test]
    fn test_load_from_str_fills_defaults() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            remote_url = "https://api.example.com"
            notification_limit = 10
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.remote_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.notification_limit, 10);
        assert!(config.auto_sync);
        assert_eq!(config.store_retry_delay_ms, 200);
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::with_data_dir(temp.path().join("data"));
        config.remote_url = Some("https://sync.example.com".to_string());
        config.auto_sync = false;
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.data_dir.exists());
    }
}
