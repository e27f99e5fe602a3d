//! Device identity
//!
//! Each installation has a stable device id, generated on first run and kept
//! in `data_dir/device_id`. The session registry uses it to tell this device
//! apart from others signed into the same account.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    device_id: String,
    /// Whether the id was generated during this load
    is_new: bool,
}

impl DeviceIdentity {
    /// Resolve the device id: configuration override, then the persisted file,
    /// then a freshly generated one that is written back.
    pub fn load_or_create(config: &Config) -> Result<Self> {
        if let Some(id) = config.device_id.as_deref().map(str::trim) {
            if !id.is_empty() {
                return Ok(Self {
                    device_id: id.to_string(),
                    is_new: false,
                });
            }
        }

        let path = config.device_id_path();
        if let Some(existing) = Self::read(&path)? {
            return Ok(Self {
                device_id: existing,
                is_new: false,
            });
        }

        let device_id = Uuid::new_v4().to_string();
        config.ensure_data_dir()?;
        fs::write(&path, &device_id)
            .with_context(|| format!("Failed to write device id to {:?}", path))?;
        info!(device_id = %device_id, "Generated new device id");

        Ok(Self {
            device_id,
            is_new: true,
        })
    }

    fn read(path: &PathBuf) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read device id from {:?}", path))?;
        let id = content.trim();
        Ok((!id.is_empty()).then(|| id.to_string()))
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }
}
