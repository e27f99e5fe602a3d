//! Device exclusivity
//!
//! One `active_sessions` document per user names the device currently allowed
//! to hold the session. Logging in overwrites it with this device's id. A
//! realtime watch on that document forces a logout here as soon as another
//! device takes over. Token refresh runs on its own timer; the watch and the
//! timer never stop each other.
//!
//! A login whose registration could not reach the remote stays pending; the
//! claim and the watch are retried on [`SessionRegistry::resume_pending`],
//! which runs when connectivity returns and on every refresh tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthError, AuthEvent, AuthSession, AuthState};
use crate::models::{now_millis, ActiveSession};
use crate::remote::codec::{encode_time, Fields};
use crate::remote::{
    CollectionPath, Document, DocumentStore, FieldFilter, RemoteDocument,
    RemoteResult,
};

pub const SESSIONS_COLLECTION: &str = "active_sessions";

/// How long a refreshed session stays valid
pub const SESSION_LIFETIME_DAYS: i64 = 14;

/// Receives the current id token whenever it changes (`None` on logout)
pub type TokenListener = Arc<dyn Fn(Option<String>) + Send + Sync>;

fn sessions() -> CollectionPath {
    CollectionPath::new(SESSIONS_COLLECTION)
}

fn session_document(session: &ActiveSession) -> Document {
    let mut doc = Document::new();
    doc.insert("userId".into(), session.user_id.clone().into());
    doc.insert("deviceId".into(), session.device_id.clone().into());
    doc.insert("lastLoginTime".into(), encode_time(session.last_login_time));
    if let Some(expires_at) = session.expires_at {
        doc.insert("expiresAt".into(), encode_time(expires_at));
    }
    doc
}

fn decode_session(remote: &RemoteDocument) -> RemoteResult<ActiveSession> {
    let f = Fields::new(&remote.path, &remote.data);
    Ok(ActiveSession {
        user_id: f.str("userId")?,
        device_id: f.str("deviceId")?,
        last_login_time: f.time("lastLoginTime")?,
        expires_at: f.opt_time("expiresAt")?,
    })
}

/// Login time of a session document; unreadable ones sort oldest
fn login_time(remote: &RemoteDocument) -> Option<DateTime<Utc>> {
    Fields::new(&remote.path, &remote.data)
        .opt_time("lastLoginTime")
        .ok()
        .flatten()
}

/// Newest first
fn sort_newest_first(docs: &mut [RemoteDocument]) {
    docs.sort_by(|a, b| login_time(b).cmp(&login_time(a)));
}

#[derive(Default)]
struct Timers {
    watch: Option<CancellationToken>,
    refresh: Option<CancellationToken>,
}

pub struct SessionRegistry {
    store: Arc<dyn DocumentStore>,
    auth: Arc<AuthSession>,
    device_id: String,
    refresh_interval: Duration,
    token_listener: Option<TokenListener>,
    timers: Mutex<Timers>,
    /// Set once a takeover was seen for the current login
    takeover_seen: AtomicBool,
    /// The signed-in user's session document is not claimed yet
    registration_pending: AtomicBool,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        auth: Arc<AuthSession>,
        device_id: impl Into<String>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            store,
            auth,
            device_id: device_id.into(),
            refresh_interval,
            token_listener: None,
            timers: Mutex::new(Timers::default()),
            takeover_seen: AtomicBool::new(false),
            registration_pending: AtomicBool::new(false),
        }
    }

    pub fn with_token_listener(mut self, listener: TokenListener) -> Self {
        self.token_listener = Some(listener);
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish_token(&self, token: Option<String>) {
        if let Some(listener) = &self.token_listener {
            listener(token);
        }
    }

    pub fn is_watching(&self) -> bool {
        self.timers().watch.is_some()
    }

    pub fn is_refreshing(&self) -> bool {
        self.timers().refresh.is_some()
    }

    pub fn is_registration_pending(&self) -> bool {
        self.registration_pending.load(Ordering::SeqCst)
    }

    /// Tear down background work when the provider rejects the session
    fn install_rejection_hook(self: &Arc<Self>) {
        let registry: Weak<Self> = Arc::downgrade(self);
        self.auth.on_session_rejected(Arc::new(move |user_id: &str| {
            let Some(registry) = registry.upgrade() else { return };
            registry.stop_watch();
            registry.stop_refresh_timer();
            registry.registration_pending.store(false, Ordering::SeqCst);
            registry.publish_token(None);
            info!(user_id, "Session rejected, watch and refresh stopped");
        }));
    }

    /// Sign in, claim the session for this device and start watching it
    ///
    /// Registration and watch failures are logged and the sign-in still
    /// stands. The watch only starts once the claim succeeded.
    pub async fn login(
        self: &Arc<Self>,
        user_id: &str,
        id_token: String,
        refresh_token: Option<String>,
    ) -> Result<(), AuthError> {
        self.auth
            .sign_in(user_id, id_token.clone(), refresh_token)
            .await?;
        self.publish_token(Some(id_token));
        self.takeover_seen.store(false, Ordering::SeqCst);

        // A watch left from an earlier login must not outlive the new claim
        self.stop_watch();
        self.registration_pending.store(true, Ordering::SeqCst);
        self.claim_and_watch(user_id).await;
        self.start_refresh_timer();

        self.auth.emit(AuthEvent::LoggedIn {
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    /// Register if still pending, then watch if not watching yet
    async fn claim_and_watch(self: &Arc<Self>, user_id: &str) -> bool {
        if self.is_registration_pending() {
            if let Err(e) = self.register_active_session(user_id).await {
                error!(user_id, error = %e, "Failed to register active session, will retry");
                return false;
            }
            self.registration_pending.store(false, Ordering::SeqCst);
        }
        if self.is_watching() {
            return true;
        }
        self.start_watch(user_id).await
    }

    /// Finish a login that could not reach the remote
    ///
    /// Claims the session if that is still pending and restarts a missing
    /// watch. Returns whether this device now holds a watched session.
    pub async fn resume_pending(self: &Arc<Self>) -> bool {
        let Some(user_id) = self.auth.current_user_id() else {
            self.registration_pending.store(false, Ordering::SeqCst);
            return false;
        };
        if !self.is_registration_pending() && self.is_watching() {
            return true;
        }
        let resumed = self.claim_and_watch(&user_id).await;
        if resumed {
            info!(user_id, "Active session resumed");
        }
        resumed
    }

    /// Make this device the one active session of `user_id`
    ///
    /// Stray duplicates are repaired by keeping the most recently logged-in
    /// document and deleting the others.
    pub async fn register_active_session(&self, user_id: &str) -> RemoteResult<()> {
        let filter = FieldFilter::eq("userId", user_id);
        let mut existing = self.store.query(&sessions(), Some(&filter)).await?;
        let now = now_millis();

        let mut claim = Document::new();
        claim.insert("deviceId".into(), self.device_id.clone().into());
        claim.insert("lastLoginTime".into(), encode_time(now));

        if existing.is_empty() {
            let session = ActiveSession {
                user_id: user_id.to_string(),
                device_id: self.device_id.clone(),
                last_login_time: now,
                expires_at: Some(now + chrono::Duration::days(SESSION_LIFETIME_DAYS)),
            };
            self.store
                .set(&sessions().doc(user_id), session_document(&session))
                .await?;
            info!(user_id, device_id = %self.device_id, "Created active session");
            return Ok(());
        }

        if existing.len() > 1 {
            warn!(
                user_id,
                count = existing.len(),
                "Multiple active sessions found, keeping the newest"
            );
            sort_newest_first(&mut existing);
            for stale in &existing[1..] {
                self.store.delete(&stale.path).await?;
                debug!(path = %stale.path, "Removed duplicate session");
            }
        }

        self.store.update(&existing[0].path, claim).await?;
        info!(user_id, device_id = %self.device_id, "Claimed active session");
        Ok(())
    }

    /// The session currently registered for `user_id`
    pub async fn active_session(&self, user_id: &str) -> RemoteResult<Option<ActiveSession>> {
        let filter = FieldFilter::eq("userId", user_id);
        let mut docs = self.store.query(&sessions(), Some(&filter)).await?;
        sort_newest_first(&mut docs);
        docs.first().map(decode_session).transpose()
    }

    /// Bump `lastLoginTime` and push `expiresAt` out again
    pub async fn refresh_session(&self, user_id: &str) -> RemoteResult<()> {
        let filter = FieldFilter::eq("userId", user_id);
        let mut docs = self.store.query(&sessions(), Some(&filter)).await?;
        sort_newest_first(&mut docs);
        let Some(current) = docs.first() else {
            debug!(user_id, "No active session to refresh");
            return Ok(());
        };

        let now = now_millis();
        let mut fields = Document::new();
        fields.insert("lastLoginTime".into(), encode_time(now));
        fields.insert(
            "expiresAt".into(),
            encode_time(now + chrono::Duration::days(SESSION_LIFETIME_DAYS)),
        );
        self.store.update(&current.path, fields).await?;
        debug!(user_id, "Session refreshed");
        Ok(())
    }

    /// Issue a new token, then extend the session
    pub async fn refresh_now(&self) -> Result<(), AuthError> {
        let token = self.auth.refresh_token().await?;
        self.publish_token(Some(token));

        if let Some(user_id) = self.auth.current_user_id() {
            if let Err(e) = self.refresh_session(&user_id).await {
                warn!(user_id, error = %e, "Failed to refresh active session");
            }
        }
        Ok(())
    }

    /// Watch the user's session document for a takeover by another device
    ///
    /// Returns `false` when the watch could not be opened.
    pub async fn start_watch(self: &Arc<Self>, user_id: &str) -> bool {
        self.stop_watch();
        self.install_rejection_hook();

        let filter = FieldFilter::eq("userId", user_id);
        let mut subscription = match self.store.listen(&sessions(), Some(filter)).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(user_id, error = %e, "Failed to start session watch");
                return false;
            }
        };

        let cancel = CancellationToken::new();
        self.timers().watch = Some(cancel.clone());

        let registry: Weak<Self> = Arc::downgrade(self);
        let user_id = user_id.to_string();
        info!(user_id, "Watching active session");

        tokio::spawn(async move {
            loop {
                let snapshot = tokio::select! {
                    _ = cancel.cancelled() => break,
                    snapshot = subscription.next() => snapshot,
                };
                let Some(mut docs) = snapshot else { break };
                let Some(registry) = registry.upgrade() else { break };

                sort_newest_first(&mut docs);
                let active_device = docs
                    .first()
                    .and_then(|d| d.data.get("deviceId"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);

                match active_device {
                    None => debug!(user_id, "No active session document"),
                    Some(device) if device.is_empty() || device == registry.device_id => {}
                    Some(device) => {
                        if registry.takeover_seen.swap(true, Ordering::SeqCst) {
                            break;
                        }
                        info!(user_id, other_device = %device, "Session taken over by another device");
                        registry.forced_logout().await;
                        break;
                    }
                }
            }
            debug!(user_id, "Session watch stopped");
        });
        true
    }

    pub fn stop_watch(&self) {
        if let Some(cancel) = self.timers().watch.take() {
            cancel.cancel();
        }
    }

    /// Refresh the token every `refresh_interval` until stopped
    pub fn start_refresh_timer(self: &Arc<Self>) {
        self.stop_refresh_timer();
        self.install_rejection_hook();

        let cancel = CancellationToken::new();
        self.timers().refresh = Some(cancel.clone());
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.refresh_interval;

        tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticks.tick() => {}
                }
                let Some(registry) = registry.upgrade() else { break };
                if let Err(e) = registry.refresh_now().await {
                    warn!(error = %e, "Automatic token refresh failed");
                }
                if registry.auth.connectivity().is_connected() {
                    registry.resume_pending().await;
                }
            }
        });
    }

    pub fn stop_refresh_timer(&self) {
        if let Some(cancel) = self.timers().refresh.take() {
            cancel.cancel();
        }
    }

    /// Voluntary logout
    ///
    /// Removes this device's session document, stops the watch and the
    /// refresh timer, then signs out. Returns the user that was signed in.
    pub async fn logout(&self) -> Option<String> {
        self.stop_watch();
        self.stop_refresh_timer();
        self.registration_pending.store(false, Ordering::SeqCst);

        if let Some(user_id) = self.auth.current_user_id() {
            if self.auth.connectivity().is_connected() {
                if let Err(e) = self.remove_own_session(&user_id).await {
                    warn!(user_id, error = %e, "Failed to remove active session");
                }
            }
        }

        let user_id = self.auth.sign_out().await;
        self.publish_token(None);
        user_id
    }

    async fn remove_own_session(&self, user_id: &str) -> RemoteResult<()> {
        let filter = FieldFilter::eq("userId", user_id);
        for doc in self.store.query(&sessions(), Some(&filter)).await? {
            let device = doc.data.get("deviceId").and_then(|v| v.as_str());
            if device == Some(self.device_id.as_str()) {
                self.store.delete(&doc.path).await?;
                debug!(path = %doc.path, "Removed active session");
            }
        }
        Ok(())
    }

    /// Logout caused by another device's takeover
    ///
    /// `ForcedLogoutDetected` is emitted whatever happens during logout.
    pub async fn forced_logout(&self) {
        let user_id = self.auth.current_user_id();
        self.stop_watch();
        self.logout().await;
        info!(user_id = ?user_id, "Forced logout completed");
        self.auth.emit(AuthEvent::ForcedLogoutDetected { user_id });
    }

    /// Stop background work without touching the session
    pub fn shutdown(&self) {
        self.stop_watch();
        self.stop_refresh_timer();
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialStore, StaticTokenProvider};
    use crate::connectivity::ConnectivityMonitor;
    use crate::remote::MemoryDocumentStore;
    use tokio::sync::broadcast;

    struct Device {
        registry: Arc<SessionRegistry>,
        provider: Arc<StaticTokenProvider>,
    }

    fn device(store: &Arc<MemoryDocumentStore>, device_id: &str, refresh: Duration) -> Device {
        let provider = Arc::new(StaticTokenProvider::new());
        let connectivity = ConnectivityMonitor::offline();
        connectivity.set_connected(true);
        let auth = Arc::new(AuthSession::new(
            CredentialStore::new(),
            provider.clone(),
            connectivity,
            Duration::from_secs(1),
        ));
        let registry = Arc::new(SessionRegistry::new(
            store.clone(),
            auth,
            device_id,
            refresh,
        ));
        Device { registry, provider }
    }

    async fn next_forced(events: &mut broadcast::Receiver<AuthEvent>) -> AuthEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = events.recv().await.unwrap();
                if matches!(event, AuthEvent::ForcedLogoutDetected { .. }) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    fn session_doc(user: &str, device: &str, at: DateTime<Utc>) -> Document {
        session_document(&ActiveSession {
            user_id: user.into(),
            device_id: device.into(),
            last_login_time: at,
            expires_at: None,
        })
    }

    #[tokio::test]
    async fn test_login_registers_session() {
        let store = Arc::new(MemoryDocumentStore::new());
        let a = device(&store, "device-a", Duration::from_secs(3300));

        a.registry.login("u1", "token".into(), None).await.unwrap();

        let session = a.registry.active_session("u1").await.unwrap().unwrap();
        assert_eq!(session.device_id, "device-a");
        assert!(session.expires_at.is_some());
        assert!(a.registry.is_watching());
        assert!(a.registry.is_refreshing());
    }

    #[tokio::test]
    async fn test_takeover_forces_logout_once() {
        let store = Arc::new(MemoryDocumentStore::new());
        let a = device(&store, "device-a", Duration::from_secs(3300));
        let b = device(&store, "device-b", Duration::from_secs(3300));

        a.registry.login("u1", "token".into(), None).await.unwrap();
        let mut a_events = a.registry.auth().subscribe();

        b.registry.login("u1", "token".into(), None).await.unwrap();

        assert_eq!(
            next_forced(&mut a_events).await,
            AuthEvent::ForcedLogoutDetected {
                user_id: Some("u1".into())
            }
        );
        assert!(!a.registry.auth().is_signed_in());
        assert!(!a.registry.is_watching());

        // A second write on the session document does not fire again
        b.registry.refresh_session("u1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = a_events.try_recv() {
            assert!(!matches!(event, AuthEvent::ForcedLogoutDetected { .. }));
        }

        // Exactly one session row, owned by B, and B is unaffected
        assert_eq!(store.count(&sessions()), 1);
        let session = b.registry.active_session("u1").await.unwrap().unwrap();
        assert_eq!(session.device_id, "device-b");
        assert!(b.registry.auth().is_signed_in());
    }

    #[tokio::test]
    async fn test_unreachable_registration_resumes_later() {
        let store = Arc::new(MemoryDocumentStore::new());
        let a = device(&store, "device-a", Duration::from_secs(3300));
        let b = device(&store, "device-b", Duration::from_secs(3300));
        b.registry.login("u1", "token".into(), None).await.unwrap();
        let mut b_events = b.registry.auth().subscribe();

        store.fail_path(SESSIONS_COLLECTION);
        a.registry.login("u1", "token".into(), None).await.unwrap();
        assert!(a.registry.auth().is_signed_in());
        assert!(a.registry.is_registration_pending());
        assert!(!a.registry.is_watching());
        assert!(a.registry.is_refreshing());

        // Still unreachable: nothing changes
        assert!(!a.registry.resume_pending().await);
        assert!(a.registry.is_registration_pending());

        store.clear_failures();
        assert!(a.registry.resume_pending().await);
        assert!(!a.registry.is_registration_pending());
        assert!(a.registry.is_watching());

        let session = a.registry.active_session("u1").await.unwrap().unwrap();
        assert_eq!(session.device_id, "device-a");
        assert_eq!(
            next_forced(&mut b_events).await,
            AuthEvent::ForcedLogoutDetected {
                user_id: Some("u1".into())
            }
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(a.registry.auth().is_signed_in());
        assert!(!b.registry.auth().is_signed_in());
        assert_eq!(store.count(&sessions()), 1);
    }

    #[tokio::test]
    async fn test_resume_pending_needs_signed_in_user() {
        let store = Arc::new(MemoryDocumentStore::new());
        let a = device(&store, "device-a", Duration::from_secs(3300));
        assert!(!a.registry.resume_pending().await);
        assert!(!a.registry.is_watching());
        assert_eq!(store.count(&sessions()), 0);
    }

    #[tokio::test]
    async fn test_rejected_session_stops_watch_and_refresh() {
        let store = Arc::new(MemoryDocumentStore::new());
        let a = device(&store, "device-a", Duration::from_secs(3300));
        let b = device(&store, "device-b", Duration::from_secs(3300));
        a.registry.login("u1", "token".into(), None).await.unwrap();
        assert!(a.registry.is_watching());

        a.provider.reject("u1");
        assert!(!a.registry.auth().is_authenticated().await);
        assert!(!a.registry.auth().is_signed_in());
        assert!(!a.registry.is_watching());
        assert!(!a.registry.is_refreshing());

        // A later takeover does not reach the signed-out device
        let mut a_events = a.registry.auth().subscribe();
        b.registry.login("u1", "token".into(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = a_events.try_recv() {
            assert!(!matches!(event, AuthEvent::ForcedLogoutDetected { .. }));
        }
        assert!(b.registry.auth().is_signed_in());
    }

    #[tokio::test]
    async fn test_duplicate_sessions_repaired() {
        let store = Arc::new(MemoryDocumentStore::new());
        let now = now_millis();
        for (id, age) in [("s1", 3), ("s2", 1), ("s3", 2)] {
            store
                .set(
                    &sessions().doc(id),
                    session_doc("u1", id, now - chrono::Duration::hours(age)),
                )
                .await
                .unwrap();
        }

        let a = device(&store, "device-a", Duration::from_secs(3300));
        a.registry.register_active_session("u1").await.unwrap();

        assert_eq!(store.count(&sessions()), 1);
        assert!(store.contains(&sessions().doc("s2")));
        let session = a.registry.active_session("u1").await.unwrap().unwrap();
        assert_eq!(session.device_id, "device-a");
    }

    #[tokio::test]
    async fn test_logout_removes_own_session_only() {
        let store = Arc::new(MemoryDocumentStore::new());
        let a = device(&store, "device-a", Duration::from_secs(3300));
        a.registry.login("u1", "token".into(), None).await.unwrap();
        store
            .set(&sessions().doc("u2"), session_doc("u2", "device-z", now_millis()))
            .await
            .unwrap();

        assert_eq!(a.registry.logout().await.as_deref(), Some("u1"));
        assert!(!store.contains(&sessions().doc("u1")));
        assert!(store.contains(&sessions().doc("u2")));
        assert!(!a.registry.is_watching());
        assert!(!a.registry.is_refreshing());
        assert_eq!(a.registry.auth().last_known_user_id().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_refresh_extends_session() {
        let store = Arc::new(MemoryDocumentStore::new());
        let tokens = Arc::new(Mutex::new(Vec::<Option<String>>::new()));
        let a = {
            let d = device(&store, "device-a", Duration::from_secs(3300));
            let tokens = tokens.clone();
            let registry = Arc::try_unwrap(d.registry)
                .ok()
                .unwrap()
                .with_token_listener(Arc::new(move |t: Option<String>| tokens.lock().unwrap().push(t)));
            Device {
                registry: Arc::new(registry),
                provider: d.provider,
            }
        };
        a.registry.login("u1", "token".into(), None).await.unwrap();
        let before = a.registry.active_session("u1").await.unwrap().unwrap();

        a.registry.refresh_now().await.unwrap();

        let after = a.registry.active_session("u1").await.unwrap().unwrap();
        assert!(after.last_login_time >= before.last_login_time);
        let expires = after.expires_at.unwrap();
        assert!(expires > now_millis() + chrono::Duration::days(SESSION_LIFETIME_DAYS - 1));
        assert_eq!(a.provider.refresh_count(), 1);

        let tokens = tokens.lock().unwrap();
        assert_eq!(tokens.len(), 2);
        assert!(tokens[1].as_deref().unwrap().starts_with("u1."));
    }

    #[tokio::test]
    async fn test_refresh_timer_independent_of_watch() {
        let store = Arc::new(MemoryDocumentStore::new());
        let a = device(&store, "device-a", Duration::from_millis(20));
        a.registry.login("u1", "token".into(), None).await.unwrap();

        // Failing refreshes keep the timer and the watch alive
        a.provider.set_unavailable(true);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(a.registry.is_refreshing());
        assert!(a.registry.is_watching());

        a.provider.set_unavailable(false);
        tokio::time::timeout(Duration::from_secs(2), async {
            while a.provider.refresh_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // Stopping the watch leaves the timer running
        a.registry.stop_watch();
        assert!(a.registry.is_refreshing());
        a.registry.shutdown();
    }
}
