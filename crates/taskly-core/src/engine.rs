//! Engine: the unified entry point
//!
//! Wires configuration, device identity, the local and remote stores,
//! connectivity, authentication, the session registry and one sync
//! coordinator per entity type.
//!
//! ## Usage
//!
//! ```ignore
//! let engine = Arc::new(Engine::open(Config::load()?)?);
//! engine.start().await;
//!
//! let task = engine.tasks().create(Task::new("Buy milk")).await?;
//! let open = engine.tasks().list().await?;
//! ```
//!
//! Once started, the engine reacts to events in the background:
//! connectivity restored pushes pending rows, a login claims and pulls, and
//! a logout (voluntary or forced) drops every read cache. Sync reactions are
//! skipped when `auto_sync` is off.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::advisory::{Advisory, LogAdvisory};
use crate::auth::{
    AuthError, AuthEvent, AuthSession, AuthState, CredentialStore, StaticTokenProvider,
    TokenProvider,
};
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, NeverReachable, ReachabilityProbe, TcpProbe};
use crate::identity::DeviceIdentity;
use crate::models::{EntityKind, Notification, Project, Task};
use crate::remote::{DocumentStore, HttpDocumentStore, MemoryDocumentStore};
use crate::scheduler::{NoopScheduler, ReminderScheduler};
use crate::session::{SessionRegistry, TokenListener};
use crate::storage::{Filter, LocalStore};
use crate::sync::{
    Entity, NotificationCoordinator, ProjectCoordinator, SyncCoordinator, SyncReport,
    TaskCoordinator,
};

/// Snapshot of the engine state, for display
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub device_id: String,
    pub remote_url: Option<String>,
    pub online: bool,
    pub signed_in: bool,
    pub user_id: Option<String>,
    pub last_user_id: Option<String>,
    pub auto_sync: bool,
    /// Rows waiting for a push, per entity type
    pub pending: Vec<(EntityKind, usize)>,
}

impl EngineStatus {
    pub fn total_pending(&self) -> usize {
        self.pending.iter().map(|(_, n)| n).sum()
    }
}

/// Builder for [`Engine`]; every part not supplied is derived from the config
pub struct EngineBuilder {
    config: Config,
    local: Option<Arc<LocalStore>>,
    remote: Option<Arc<dyn DocumentStore>>,
    connectivity: Option<ConnectivityMonitor>,
    credentials: Option<CredentialStore>,
    provider: Option<Arc<dyn TokenProvider>>,
    scheduler: Arc<dyn ReminderScheduler>,
    advisory: Arc<dyn Advisory>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            local: None,
            remote: None,
            connectivity: None,
            credentials: None,
            provider: None,
            scheduler: Arc::new(NoopScheduler),
            advisory: Arc::new(LogAdvisory),
        }
    }

    pub fn local_store(mut self, local: Arc<LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    /// Remote backend to use instead of the one named by `remote_url`
    pub fn remote_store(mut self, remote: Arc<dyn DocumentStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn ReminderScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn advisory(mut self, advisory: Arc<dyn Advisory>) -> Self {
        self.advisory = advisory;
        self
    }

    /// Assemble the engine
    ///
    /// The local store is opened here so a broken database fails fast.
    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        config
            .ensure_data_dir()
            .context("Failed to create data directory")?;
        let identity =
            DeviceIdentity::load_or_create(&config).context("Failed to load device identity")?;

        let local = match self.local {
            Some(local) => local,
            None => Arc::new(LocalStore::from_config(&config)),
        };
        local.open().context("Failed to open local store")?;

        // The HTTP backend also needs the current token, so keep its concrete handle
        let mut http: Option<Arc<HttpDocumentStore>> = None;
        let mut probe: Arc<dyn ReachabilityProbe> = Arc::new(NeverReachable);
        let remote: Arc<dyn DocumentStore> = match (self.remote, config.remote_url.as_deref()) {
            (Some(remote), _) => remote,
            (None, Some(url)) => {
                let store = Arc::new(
                    HttpDocumentStore::new(url).context("Failed to configure remote store")?,
                );
                match TcpProbe::for_url(url) {
                    Some(tcp) => probe = Arc::new(tcp),
                    None => warn!(url, "Remote URL has no reachable host, staying offline"),
                }
                http = Some(store.clone());
                store
            }
            (None, None) => {
                debug!("No remote configured, running local-only");
                Arc::new(MemoryDocumentStore::new())
            }
        };

        let connectivity = self
            .connectivity
            .unwrap_or_else(|| ConnectivityMonitor::new(probe, config.connectivity_interval()));

        let credentials = match self.credentials {
            Some(credentials) => credentials,
            None => CredentialStore::with_path(config.credentials_path())
                .context("Failed to load credentials")?,
        };
        let provider: Arc<dyn TokenProvider> = match self.provider {
            Some(provider) => provider,
            None => Arc::new(StaticTokenProvider::new()),
        };
        let auth = Arc::new(AuthSession::new(
            credentials,
            provider,
            connectivity.clone(),
            config.auth_wait_timeout(),
        ));

        let mut sessions = SessionRegistry::new(
            remote.clone(),
            auth.clone(),
            identity.device_id(),
            config.token_refresh_interval(),
        );
        if let Some(http) = http {
            http.set_token(auth.id_token());
            let listener: TokenListener =
                Arc::new(move |token: Option<String>| http.set_token(token));
            sessions = sessions.with_token_listener(listener);
        }

        let tasks: Arc<TaskCoordinator> = Arc::new(
            SyncCoordinator::new(local.clone(), remote.clone(), auth.clone(), connectivity.clone())
                .with_scheduler(self.scheduler.clone())
                .with_advisory(self.advisory.clone()),
        );
        let projects: Arc<ProjectCoordinator> = Arc::new(
            SyncCoordinator::new(local.clone(), remote.clone(), auth.clone(), connectivity.clone())
                .with_scheduler(self.scheduler)
                .with_advisory(self.advisory.clone())
                .with_cascade(tasks.clone()),
        );
        let notifications: Arc<NotificationCoordinator> = Arc::new(
            SyncCoordinator::new(local.clone(), remote, auth.clone(), connectivity.clone())
                .with_advisory(self.advisory)
                .with_retention(config.notification_limit),
        );

        info!(
            device_id = identity.device_id(),
            new_device = identity.is_new(),
            remote = ?config.remote_url,
            "Engine ready"
        );

        Ok(Engine {
            config,
            device_id: identity.device_id().to_string(),
            local,
            connectivity,
            auth,
            sessions: Arc::new(sessions),
            tasks,
            projects,
            notifications,
            sync_lock: AsyncMutex::new(()),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }
}

pub struct Engine {
    config: Config,
    device_id: String,
    local: Arc<LocalStore>,
    connectivity: ConnectivityMonitor,
    auth: Arc<AuthSession>,
    sessions: Arc<SessionRegistry>,
    tasks: Arc<TaskCoordinator>,
    projects: Arc<ProjectCoordinator>,
    notifications: Arc<NotificationCoordinator>,
    /// One synchronization pass at a time
    sync_lock: AsyncMutex<()>,
    started: AtomicBool,
    cancel: CancellationToken,
}

async fn login_pass<T: Entity>(coordinator: &SyncCoordinator<T>, user_id: &str, report: &mut SyncReport) {
    match coordinator.synchronize_on_login(user_id).await {
        Ok(r) => report.merge(r),
        Err(e) => warn!(kind = %coordinator.kind(), user_id, error = %e, "Login synchronization failed"),
    }
}

async fn reconnect_pass<T: Entity>(coordinator: &SyncCoordinator<T>, report: &mut SyncReport) {
    match coordinator.synchronize_on_connection_restored().await {
        Ok(r) => report.merge(r),
        Err(e) => warn!(kind = %coordinator.kind(), error = %e, "Reconnect synchronization failed"),
    }
}

impl Engine {
    /// Open with the given configuration and default parts
    pub fn open(config: Config) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn tasks(&self) -> &Arc<TaskCoordinator> {
        &self.tasks
    }

    pub fn projects(&self) -> &Arc<ProjectCoordinator> {
        &self.projects
    }

    pub fn notifications(&self) -> &Arc<NotificationCoordinator> {
        &self.notifications
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Start the connectivity monitor and the event loop
    ///
    /// A session persisted from an earlier run, or a login whose claim is
    /// still pending, gets its watch and refresh timer back. Calling this twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        // Subscribe before anything can publish
        let mut online = self.connectivity.subscribe();
        let mut auth_events = self.auth.subscribe();

        self.connectivity.spawn(self.cancel.child_token());

        if self.auth.is_signed_in() {
            if let Some(user_id) = self.auth.current_user_id() {
                info!(user_id, "Resuming persisted session");
                if !self.sessions.resume_pending().await {
                    debug!(user_id, "Session claim or watch retried on reconnect");
                }
                self.sessions.start_refresh_timer();
            }
        }

        let engine: Weak<Self> = Arc::downgrade(self);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            debug!("Engine event loop started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let connected = *online.borrow_and_update();
                        let Some(engine) = engine.upgrade() else { break };
                        if connected {
                            engine.on_connection_restored().await;
                        }
                    }
                    event = auth_events.recv() => {
                        let event = match event {
                            Ok(event) => event,
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, "Engine missed auth events");
                                continue;
                            }
                            Err(RecvError::Closed) => break,
                        };
                        let Some(engine) = engine.upgrade() else { break };
                        engine.on_auth_event(event).await;
                    }
                }
            }
            debug!("Engine event loop stopped");
        });
    }

    async fn on_connection_restored(&self) {
        if self.auth.is_signed_in() {
            self.sessions.resume_pending().await;
        }
        if !self.config.auto_sync {
            debug!("Auto sync off, not reacting to reconnect");
            return;
        }
        let report = self.sync_on_reconnect().await;
        debug!(pushed = report.pushed, failed = report.failed, "Reconnect handled");
    }

    async fn on_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::LoggedIn { user_id } => {
                if self.config.auto_sync {
                    self.sync_on_login(&user_id).await;
                } else {
                    debug!(user_id, "Auto sync off, not reacting to login");
                }
            }
            AuthEvent::LoggedOut { .. } | AuthEvent::ForcedLogoutDetected { .. } => {
                self.clear_caches();
            }
        }
    }

    /// Push pending rows of every entity type: projects, tasks, notifications
    pub async fn sync_on_reconnect(&self) -> SyncReport {
        let _guard = self.sync_lock.lock().await;
        let mut report = SyncReport::default();
        reconnect_pass(&self.projects, &mut report).await;
        reconnect_pass(&self.tasks, &mut report).await;
        reconnect_pass(&self.notifications, &mut report).await;
        report
    }

    /// Claim unclaimed rows for `user_id` and pull theirs, for every entity type
    pub async fn sync_on_login(&self, user_id: &str) -> SyncReport {
        let _guard = self.sync_lock.lock().await;
        let mut report = SyncReport::default();
        login_pass(&self.projects, user_id, &mut report).await;
        login_pass(&self.tasks, user_id, &mut report).await;
        login_pass(&self.notifications, user_id, &mut report).await;
        report
    }

    /// Probe connectivity, then push pending rows and pull the user's data
    ///
    /// `None` when nobody is signed in.
    pub async fn sync_now(&self) -> Option<SyncReport> {
        self.connectivity.check_now().await;
        if !self.auth.is_authenticated().await {
            return None;
        }
        let user_id = self.auth.current_user_id()?;

        let mut report = self.sync_on_reconnect().await;
        report.merge(self.sync_on_login(&user_id).await);
        Some(report)
    }

    /// Sign in and claim this device's session
    ///
    /// Without the event loop running, the login synchronization runs
    /// inline (when `auto_sync` is on).
    pub async fn login(
        &self,
        user_id: &str,
        id_token: String,
        refresh_token: Option<String>,
    ) -> Result<(), AuthError> {
        self.sessions.login(user_id, id_token, refresh_token).await?;
        if !self.is_started() && self.config.auto_sync {
            self.sync_on_login(user_id).await;
        }
        Ok(())
    }

    /// Sign out and drop the caches; returns the user that was signed in
    pub async fn logout(&self) -> Option<String> {
        let user_id = self.sessions.logout().await;
        self.clear_caches();
        user_id
    }

    pub fn clear_caches(&self) {
        self.projects.clear_cache();
        self.tasks.clear_cache();
        self.notifications.clear_cache();
        debug!("Read caches cleared");
    }

    /// Load every read cache from the stores
    pub async fn preload(&self) -> crate::sync::SyncResult<usize> {
        let mut loaded = self.projects.preload().await?;
        loaded += self.tasks.preload().await?;
        loaded += self.notifications.preload().await?;
        Ok(loaded)
    }

    fn pending<T: Entity>(&self) -> Result<usize> {
        self.local
            .collection::<T>()
            .count(&Filter::needs_sync())
            .with_context(|| format!("Failed to count pending {}", T::KIND))
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let signed_in = self.auth.is_authenticated().await;
        Ok(EngineStatus {
            device_id: self.device_id.clone(),
            remote_url: self.config.remote_url.clone(),
            online: self.connectivity.is_connected(),
            signed_in,
            user_id: self.auth.current_user_id(),
            last_user_id: self.auth.last_known_user_id(),
            auto_sync: self.config.auto_sync,
            pending: vec![
                (EntityKind::Project, self.pending::<Project>()?),
                (EntityKind::Task, self.pending::<Task>()?),
                (EntityKind::Notification, self.pending::<Notification>()?),
            ],
        })
    }

    /// Stop background work and close the local store
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.sessions.shutdown();
        if let Err(e) = self.local.close() {
            warn!(error = %e, "Failed to close local store");
        }
        debug!("Engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteEntity;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Probe whose answer tests flip
    #[derive(Default)]
    struct Switch(AtomicBool);

    #[async_trait]
    impl ReachabilityProbe for Switch {
        async fn is_reachable(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        engine: Arc<Engine>,
        remote: Arc<MemoryDocumentStore>,
        switch: Arc<Switch>,
        _dir: TempDir,
    }

    fn fixture(auto_sync: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_data_dir(dir.path());
        config.auto_sync = auto_sync;

        let remote = Arc::new(MemoryDocumentStore::new());
        let switch = Arc::new(Switch::default());
        let connectivity = ConnectivityMonitor::new(switch.clone(), Duration::from_millis(10));

        let engine = Engine::builder(config)
            .remote_store(remote.clone())
            .connectivity(connectivity)
            .credentials(CredentialStore::new())
            .build()
            .unwrap();

        Fixture {
            engine: Arc::new(engine),
            remote,
            switch,
            _dir: dir,
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_open_local_only() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(Config::with_data_dir(dir.path())).unwrap();

        assert!(engine.local().is_open());
        assert!(!engine.device_id().is_empty());
        assert!(dir.path().join("device_id").exists());
        assert!(!engine.connectivity().is_connected());

        engine.shutdown();
        assert!(!engine.local().is_open());
    }

    #[tokio::test]
    async fn test_status_counts_pending() {
        let f = fixture(true);
        f.engine
            .login("u1", "token".into(), None)
            .await
            .unwrap();
        f.engine.tasks().create(Task::new("Offline")).await.unwrap();

        let status = f.engine.status().await.unwrap();
        assert!(status.signed_in);
        assert_eq!(status.user_id.as_deref(), Some("u1"));
        assert!(!status.online);
        assert_eq!(status.total_pending(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_pushes_pending_rows() {
        let f = fixture(true);
        f.engine.login("u1", "token".into(), None).await.unwrap();
        let task = f.engine.tasks().create(Task::new("Queued")).await.unwrap();
        assert!(task.needs_synchronization);

        f.engine.start().await;
        f.switch.0.store(true, Ordering::SeqCst);

        let path = Task::path_for("u1", &task.id);
        assert!(eventually(|| f.remote.contains(&path)).await);

        let engine = f.engine.clone();
        let id = task.id.clone();
        assert!(
            eventually(move || {
                !engine
                    .tasks()
                    .get_local(&id)
                    .unwrap()
                    .unwrap()
                    .needs_synchronization
            })
            .await
        );
        f.engine.shutdown();
    }

    #[tokio::test]
    async fn test_reconnect_claims_session_left_pending() {
        // Session claims are not a sync pass, so auto sync stays off here
        let f = fixture(false);
        f.remote.set_offline(true);
        f.engine.login("u1", "token".into(), None).await.unwrap();
        assert!(f.engine.sessions().is_registration_pending());
        assert!(!f.engine.sessions().is_watching());

        f.engine.start().await;
        f.remote.clear_failures();
        f.switch.0.store(true, Ordering::SeqCst);

        let sessions = f.engine.sessions().clone();
        assert!(
            eventually(move || !sessions.is_registration_pending() && sessions.is_watching())
                .await
        );
        let session = f
            .engine
            .sessions()
            .active_session("u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.device_id, f.engine.device_id());
        f.engine.shutdown();
    }

    #[tokio::test]
    async fn test_login_event_claims_rows() {
        let f = fixture(true);
        f.switch.0.store(true, Ordering::SeqCst);
        f.engine.start().await;
        assert!(eventually(|| f.engine.connectivity().is_connected()).await);
        let project = f.engine.projects().create(Project::new("Home")).await.unwrap();
        assert!(project.user_id.is_none());

        f.engine.login("u1", "token".into(), None).await.unwrap();

        let path = Project::path_for("u1", &project.id);
        assert!(eventually(|| f.remote.contains(&path)).await);
        f.engine.shutdown();
    }

    #[tokio::test]
    async fn test_auto_sync_off_leaves_rows_pending() {
        let f = fixture(false);
        f.engine.login("u1", "token".into(), None).await.unwrap();
        let task = f.engine.tasks().create(Task::new("Queued")).await.unwrap();

        f.engine.start().await;
        f.switch.0.store(true, Ordering::SeqCst);
        assert!(eventually(|| f.engine.connectivity().is_connected()).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!f.remote.contains(&Task::path_for("u1", &task.id)));

        // A manual sync still works
        let report = f.engine.sync_now().await.unwrap();
        assert_eq!(report.pushed, 1);
        assert!(f.remote.contains(&Task::path_for("u1", &task.id)));
        f.engine.shutdown();
    }

    #[tokio::test]
    async fn test_logout_clears_caches() {
        let f = fixture(true);
        f.engine.login("u1", "token".into(), None).await.unwrap();
        f.engine.tasks().create(Task::new("Cached")).await.unwrap();
        f.engine.preload().await.unwrap();
        assert!(f.engine.tasks().cache().unwrap().is_populated());

        assert_eq!(f.engine.logout().await.as_deref(), Some("u1"));
        assert!(!f.engine.tasks().cache().unwrap().is_populated());
        assert!(f.engine.sync_now().await.is_none());
    }
}
