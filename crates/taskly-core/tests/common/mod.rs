//! Shared setup for the integration scenarios
#![allow(dead_code)]

use std::sync::Arc;

use taskly_core::auth::CredentialStore;
use taskly_core::{
    CollectedAdvisories, Config, ConnectivityMonitor, Engine, MemoryDocumentStore,
};
use tempfile::TempDir;

/// One installation: its own data directory, sharing a remote with others
pub struct Device {
    pub engine: Arc<Engine>,
    pub advisories: Arc<CollectedAdvisories>,
    _dir: TempDir,
}

impl Device {
    pub fn set_online(&self, online: bool) {
        self.engine.connectivity().set_connected(online);
    }
}

pub fn device(name: &str, remote: &Arc<MemoryDocumentStore>, online: bool) -> Device {
    let dir = TempDir::new().unwrap();
    let mut config = Config::with_data_dir(dir.path());
    config.device_id = Some(name.to_string());

    // Never spawned, so tests own the connectivity state
    let connectivity = ConnectivityMonitor::offline();
    connectivity.set_connected(online);

    let advisories = Arc::new(CollectedAdvisories::new());
    let engine = Engine::builder(config)
        .remote_store(remote.clone())
        .connectivity(connectivity)
        .credentials(CredentialStore::new())
        .advisory(advisories.clone())
        .build()
        .unwrap();

    Device {
        engine: Arc::new(engine),
        advisories,
        _dir: dir,
    }
}
