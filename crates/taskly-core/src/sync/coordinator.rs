//! Offline-first coordinator for one entity type
//!
//! Every write goes to the local store. When the user is signed in and the
//! remote service is reachable the remote copy is written first; when signed
//! in but offline the row is tagged `needs_synchronization` and pushed on the
//! next reconnect. A remote failure never blocks the local write.
//!
//! The generic operations live here; per-type extras are in `tasks`,
//! `projects` and `notifications`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::{sort_newest_first, ReadCache};
use crate::advisory::{Advisory, LogAdvisory};
use crate::auth::AuthState;
use crate::connectivity::ConnectivityMonitor;
use crate::models::{now_millis, EntityKind, ReminderTarget, SyncEntity};
use crate::remote::{DocumentStore, FieldFilter, RemoteCollection, RemoteEntity, RemoteError};
use crate::scheduler::{NoopScheduler, ReminderScheduler};
use crate::storage::{Collection, Filter, LocalRecord, LocalStore, StorageError};

/// Coordinator errors
#[derive(Error, Debug)]
pub enum SyncError {
    /// Update or complete on a row that does not exist locally
    #[error("No {collection} entry with id '{id}'")]
    NotFound { collection: &'static str, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Everything a coordinator needs from an entity type
pub trait Entity: SyncEntity + LocalRecord + RemoteEntity {}

impl<T: SyncEntity + LocalRecord + RemoteEntity> Entity for T {}

/// Emitted after each committed change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created { kind: EntityKind, id: String },
    Updated { kind: EntityKind, id: String },
    Deleted { kind: EntityKind, id: String },
    /// The collection was reconciled and the cache rebuilt
    Synchronized { kind: EntityKind },
}

/// Outcome of a bulk synchronization
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Unclaimed rows assigned to the user
    pub claimed: usize,
    /// Rows written remotely
    pub pushed: usize,
    /// Remote rows stored locally
    pub pulled: usize,
    /// Rows whose remote write failed; they stay tagged for the next attempt
    pub failed: usize,
}

impl SyncReport {
    pub fn merge(&mut self, other: SyncReport) {
        self.claimed += other.claimed;
        self.pushed += other.pushed;
        self.pulled += other.pulled;
        self.failed += other.failed;
    }
}

/// Deletes the dependents of a parent entity before the parent goes
#[async_trait]
pub trait CascadeDelete: Send + Sync {
    /// Returns how many dependents were deleted
    async fn delete_children(&self, parent_id: &str) -> SyncResult<usize>;
}

/// Narrows `list` to part of a collection
pub struct ListFilter<T> {
    /// Local query, combined with the visibility filter
    pub local: Filter,
    /// Remote query
    pub remote: Option<FieldFilter>,
    /// Same condition, applied to cached and remote rows
    pub matches: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

/// How rows deleted in bulk are removed remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteScope {
    /// Every remote document of the user, in batches
    AllForUser,
    /// One delete per row; a failure only affects that row
    EachRow,
}

/// Auth and connectivity as seen at the start of an operation
#[derive(Debug, Clone)]
pub(crate) struct Presence {
    pub authenticated: bool,
    pub connected: bool,
    /// Signed-in user, or the last known one when signed out
    pub user_id: Option<String>,
}

impl Presence {
    pub fn online(&self) -> bool {
        self.authenticated && self.connected
    }

    pub fn offline_authenticated(&self) -> bool {
        self.authenticated && !self.connected
    }

    /// User to write under; only set while signed in
    pub fn owner(&self) -> Option<&str> {
        if self.authenticated {
            self.user_id.as_deref()
        } else {
            None
        }
    }
}

pub struct SyncCoordinator<T: Entity> {
    pub(crate) local: Arc<LocalStore>,
    pub(crate) remote: RemoteCollection<T>,
    pub(crate) auth: Arc<dyn AuthState>,
    pub(crate) connectivity: ConnectivityMonitor,
    pub(crate) cache: Option<ReadCache<T>>,
    pub(crate) scheduler: Arc<dyn ReminderScheduler>,
    pub(crate) advisory: Arc<dyn Advisory>,
    cascade: Option<Arc<dyn CascadeDelete>>,
    /// Most rows kept locally; older ones are pruned after each add
    pub(crate) retention: Option<usize>,
    events: broadcast::Sender<ChangeEvent>,
}

impl<T: Entity> SyncCoordinator<T> {
    /// Coordinator with a read cache, no reminders and log advisories
    pub fn new(
        local: Arc<LocalStore>,
        remote: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthState>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            local,
            remote: RemoteCollection::new(remote),
            auth,
            connectivity,
            cache: Some(ReadCache::new()),
            scheduler: Arc::new(NoopScheduler),
            advisory: Arc::new(LogAdvisory),
            cascade: None,
            retention: None,
            events,
        }
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn ReminderScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_advisory(mut self, advisory: Arc<dyn Advisory>) -> Self {
        self.advisory = advisory;
        self
    }

    pub fn with_cascade(mut self, cascade: Arc<dyn CascadeDelete>) -> Self {
        self.cascade = Some(cascade);
        self
    }

    pub fn with_retention(mut self, limit: usize) -> Self {
        self.retention = Some(limit);
        self
    }

    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub fn cache(&self) -> Option<&ReadCache<T>> {
        self.cache.as_ref()
    }

    pub(crate) fn collection(&self) -> Collection<'_, T> {
        self.local.collection::<T>()
    }

    pub(crate) fn emit(&self, event: ChangeEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) async fn presence(&self) -> Presence {
        let authenticated = self.auth.is_authenticated().await;
        let user_id = if authenticated {
            self.auth.current_user_id()
        } else {
            self.auth.last_known_user_id()
        };
        Presence {
            authenticated,
            connected: self.connectivity.is_connected(),
            user_id,
        }
    }

    fn not_found(id: &str) -> SyncError {
        SyncError::NotFound {
            collection: T::TABLE,
            id: id.to_string(),
        }
    }

    pub(crate) async fn schedule_reminders(&self, entity: &T) {
        let result = match entity.reminder_target() {
            Some(ReminderTarget::Task(task)) => self.scheduler.schedule_for_task(task).await,
            Some(ReminderTarget::Project(project)) => {
                self.scheduler.schedule_for_project(project).await
            }
            None => return,
        };
        if let Err(e) = result {
            warn!(kind = %T::KIND, id = entity.id(), error = %e, "Failed to schedule reminders");
        }
    }

    pub(crate) async fn cancel_reminders(&self, id: &str) {
        let result = match T::KIND {
            EntityKind::Task => self.scheduler.cancel_for_task(id).await,
            EntityKind::Project => self.scheduler.cancel_for_project(id).await,
            EntityKind::Notification => return,
        };
        if let Err(e) = result {
            warn!(kind = %T::KIND, id, error = %e, "Failed to cancel reminders");
        }
    }

    /// Store a new entity
    ///
    /// Assigns an id when missing and stamps the signed-in user as owner.
    /// Returns the entity as stored.
    pub async fn create(&self, mut entity: T) -> SyncResult<T> {
        if entity.id().is_empty() {
            entity.set_id(Uuid::new_v4().to_string());
        }
        if entity.created_at().timestamp_millis() == 0 {
            entity.set_created_at(now_millis());
        }
        if self.collection().exists(entity.id())? {
            return Err(StorageError::DuplicateId {
                collection: T::TABLE,
                id: entity.id().to_string(),
            }
            .into());
        }

        let presence = self.presence().await;
        if let Some(owner) = presence.owner() {
            entity.set_user_id(Some(owner.to_string()));
        }
        entity.set_needs_synchronization(presence.offline_authenticated());

        if presence.online() {
            debug!(kind = %T::KIND, id = entity.id(), "Online: writing remote first");
            if let Err(e) = self.remote.save(&entity).await {
                warn!(kind = %T::KIND, id = entity.id(), error = %e, "Remote write failed, keeping local copy");
                entity.set_needs_synchronization(true);
                self.advisory
                    .advise("Saved on this device only; it will sync when the connection recovers");
            }
        } else if presence.offline_authenticated() {
            info!(kind = %T::KIND, id = entity.id(), "Offline: saved locally, pending sync");
        }

        self.collection().insert(&entity)?;
        if let Some(cache) = &self.cache {
            cache.insert(entity.clone());
        }

        self.schedule_reminders(&entity).await;
        self.emit(ChangeEvent::Created {
            kind: T::KIND,
            id: entity.id().to_string(),
        });
        Ok(entity)
    }

    /// Store changes to an existing entity
    ///
    /// Fails with `NotFound` when the row is not stored locally.
    pub async fn update(&self, mut entity: T) -> SyncResult<T> {
        let Some(stored) = self.collection().find_by_id(entity.id())? else {
            return Err(Self::not_found(entity.id()));
        };

        let presence = self.presence().await;
        if !entity.is_owned() {
            let owner = stored
                .user_id()
                .map(str::to_string)
                .or_else(|| presence.owner().map(str::to_string));
            entity.set_user_id(owner);
        }

        let pending = if presence.offline_authenticated() {
            true
        } else {
            entity.needs_synchronization() || stored.needs_synchronization()
        };
        entity.set_needs_synchronization(pending);

        if presence.online() && entity.is_owned() {
            let mut pushed = entity.clone();
            pushed.set_needs_synchronization(false);
            match self.remote.save(&pushed).await {
                Ok(true) => entity.set_needs_synchronization(false),
                Ok(false) => {}
                Err(e) => {
                    warn!(kind = %T::KIND, id = entity.id(), error = %e, "Remote update failed, keeping local copy");
                    entity.set_needs_synchronization(true);
                    self.advisory
                        .advise("Saved on this device only; it will sync when the connection recovers");
                }
            }
        }

        self.collection().update(&entity)?;
        if let Some(cache) = &self.cache {
            cache.update(entity.clone());
        }

        self.schedule_reminders(&entity).await;
        self.emit(ChangeEvent::Updated {
            kind: T::KIND,
            id: entity.id().to_string(),
        });
        Ok(entity)
    }

    /// Delete by id
    ///
    /// Deleting a missing id succeeds and returns `false`.
    pub async fn delete(&self, id: &str) -> SyncResult<bool> {
        self.cancel_reminders(id).await;

        let Some(entity) = self.collection().find_by_id(id)? else {
            debug!(kind = %T::KIND, id, "Nothing to delete");
            return Ok(false);
        };

        if let Some(cascade) = &self.cascade {
            let removed = cascade.delete_children(id).await?;
            debug!(kind = %T::KIND, id, removed, "Deleted dependents");
        }

        let presence = self.presence().await;
        match (presence.online(), entity.user_id()) {
            (true, Some(owner)) if !owner.is_empty() => {
                if let Err(e) = self.remote.delete_one(id, owner).await {
                    warn!(kind = %T::KIND, id, error = %e, "Remote delete failed");
                    self.advisory
                        .advise("Deleted on this device only; the cloud copy could not be removed");
                }
            }
            _ if presence.offline_authenticated() => {
                self.advisory
                    .advise("Offline: deleted on this device only; it will sync later");
            }
            _ => {}
        }

        self.collection().delete(id)?;
        if let Some(cache) = &self.cache {
            cache.remove(id);
        }
        self.emit(ChangeEvent::Deleted {
            kind: T::KIND,
            id: id.to_string(),
        });
        Ok(true)
    }

    /// Local copy by id, from the cache when loaded
    pub fn get_local(&self, id: &str) -> SyncResult<Option<T>> {
        if let Some(found) = self.cache.as_ref().and_then(|c| c.get(id)) {
            return Ok(Some(found));
        }
        Ok(self.collection().find_by_id(id)?)
    }

    /// Entity by id, refreshed from the remote store when possible
    ///
    /// The remote copy replaces the local one. A remote failure falls back to
    /// the local copy.
    pub async fn get(&self, id: &str) -> SyncResult<Option<T>> {
        let local = self.get_local(id)?;

        let presence = self.presence().await;
        let owner = match &local {
            Some(entity) => entity.user_id().map(str::to_string),
            None => presence.owner().map(str::to_string),
        };
        let Some(owner) = owner.filter(|_| presence.online()) else {
            return Ok(local);
        };

        match self.remote.get(id, &owner).await {
            Ok(Some(remote)) => {
                self.collection().upsert(&remote)?;
                if let Some(cache) = &self.cache {
                    cache.update(remote.clone());
                }
                Ok(Some(remote))
            }
            Ok(None) => Ok(local),
            Err(e) => {
                warn!(kind = %T::KIND, id, error = %e, "Remote get failed, using local copy");
                Ok(local)
            }
        }
    }

    /// Everything visible to the current user
    pub async fn list(&self) -> SyncResult<Vec<T>> {
        self.list_where(None).await
    }

    /// Visible entities, optionally narrowed by `filter`
    ///
    /// A loaded cache answers directly. Otherwise local rows owned by the
    /// user (or the last known user while signed out) and unclaimed rows are
    /// read; online, remote rows are pulled, stored locally and merged in,
    /// remote winning on id collision.
    pub async fn list_where(&self, filter: Option<ListFilter<T>>) -> SyncResult<Vec<T>> {
        if let Some(snapshot) = self.cache.as_ref().and_then(ReadCache::snapshot) {
            return Ok(match filter {
                None => snapshot,
                Some(f) => snapshot.into_iter().filter(|e| (f.matches)(e)).collect(),
            });
        }
        self.query(filter.as_ref()).await
    }

    async fn query(&self, filter: Option<&ListFilter<T>>) -> SyncResult<Vec<T>> {
        let presence = self.presence().await;

        let mut local_filter = Filter::visible_to(presence.user_id.as_deref());
        if let Some(f) = filter {
            local_filter = local_filter.and(f.local.clone());
        }
        let mut items = self.collection().find(&local_filter)?;

        if let (true, Some(user)) = (presence.online(), presence.owner()) {
            let remote_filter = filter.and_then(|f| f.remote.as_ref());
            match self.remote.get_all_for_user(user, remote_filter).await {
                Ok(mut remote) => {
                    if let Some(f) = filter {
                        remote.retain(|e| (f.matches)(e));
                    }
                    if let Err(e) = self.collection().upsert_many(&remote) {
                        warn!(kind = %T::KIND, error = %e, "Failed to store remote rows locally");
                    }

                    let mut merged: HashMap<String, T> = items
                        .into_iter()
                        .map(|e| (e.id().to_string(), e))
                        .collect();
                    for entity in remote {
                        merged.insert(entity.id().to_string(), entity);
                    }
                    items = merged.into_values().collect();
                }
                Err(e) => {
                    warn!(kind = %T::KIND, error = %e, "Remote list failed, showing local data");
                }
            }
        }

        sort_newest_first(&mut items);
        Ok(items)
    }

    /// Load the cache through a full list
    pub async fn preload(&self) -> SyncResult<usize> {
        let Some(cache) = &self.cache else {
            return Ok(0);
        };
        let items = self.query(None).await?;
        let count = items.len();
        cache.replace(items);
        debug!(kind = %T::KIND, count, "Cache preloaded");
        Ok(count)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Reload the cache from the local store alone
    pub(crate) fn rebuild_cache(&self, user_id: Option<&str>) -> SyncResult<()> {
        if let Some(cache) = &self.cache {
            let items = self.collection().find(&Filter::visible_to(user_id))?;
            cache.replace(items);
        }
        Ok(())
    }

    /// Reconcile after `user_id` signed in
    ///
    /// Unclaimed rows are assigned to the user and pushed when online, then
    /// the user's remote rows are pulled. The cache is rebuilt from the local
    /// store afterwards.
    pub async fn synchronize_on_login(&self, user_id: &str) -> SyncResult<SyncReport> {
        let connected = self.connectivity.is_connected();
        let mut report = SyncReport::default();
        self.clear_cache();

        for mut entity in self.collection().find(&Filter::unclaimed())? {
            entity.set_user_id(Some(user_id.to_string()));
            entity.set_needs_synchronization(!connected);

            if connected {
                match self.remote.save(&entity).await {
                    Ok(_) => report.pushed += 1,
                    Err(e) => {
                        warn!(kind = %T::KIND, id = entity.id(), error = %e, "Push of claimed row failed");
                        entity.set_needs_synchronization(true);
                        report.failed += 1;
                    }
                }
            }

            self.collection().update(&entity)?;
            report.claimed += 1;
        }

        if connected {
            match self.remote.get_all_for_user(user_id, None).await {
                Ok(remote) => report.pulled = self.collection().upsert_many(&remote)?,
                Err(e) => warn!(kind = %T::KIND, user_id, error = %e, "Pull after login failed"),
            }
        }

        self.rebuild_cache(Some(user_id))?;
        info!(
            kind = %T::KIND,
            user_id,
            claimed = report.claimed,
            pushed = report.pushed,
            pulled = report.pulled,
            failed = report.failed,
            "Login synchronization finished"
        );
        self.emit(ChangeEvent::Synchronized { kind: T::KIND });
        Ok(report)
    }

    /// Push rows tagged while offline
    ///
    /// No-op when signed out. Rows of other users and unclaimed rows are left
    /// alone. A failed push keeps the tag and does not stop the others.
    pub async fn synchronize_on_connection_restored(&self) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();
        if !self.auth.is_authenticated().await {
            debug!(kind = %T::KIND, "Not signed in, skipping reconnect sync");
            return Ok(report);
        }
        let Some(user_id) = self.auth.current_user_id() else {
            return Ok(report);
        };

        for mut entity in self.collection().find(&Filter::needs_sync())? {
            if entity.user_id() != Some(user_id.as_str()) {
                continue;
            }

            entity.set_needs_synchronization(false);
            match self.remote.save(&entity).await {
                Ok(_) => {
                    self.collection().update(&entity)?;
                    if let Some(cache) = &self.cache {
                        cache.update(entity);
                    }
                    report.pushed += 1;
                }
                Err(e) => {
                    warn!(kind = %T::KIND, id = entity.id(), error = %e, "Push of pending row failed");
                    report.failed += 1;
                }
            }
        }

        self.rebuild_cache(Some(&user_id))?;
        info!(
            kind = %T::KIND,
            pushed = report.pushed,
            failed = report.failed,
            "Reconnect synchronization finished"
        );
        self.emit(ChangeEvent::Synchronized { kind: T::KIND });
        Ok(report)
    }

    /// Delete every local row matching `filter`, with the matching remote deletes
    pub(crate) async fn delete_where(&self, filter: Filter, scope: RemoteScope) -> SyncResult<usize> {
        let victims = self.collection().find(&filter)?;
        if victims.is_empty() {
            return Ok(0);
        }

        for entity in &victims {
            self.cancel_reminders(entity.id()).await;
            if let Some(cascade) = &self.cascade {
                cascade.delete_children(entity.id()).await?;
            }
        }

        let presence = self.presence().await;
        if let (true, Some(user)) = (presence.online(), presence.owner()) {
            self.delete_remote(&victims, user, scope).await;
        } else if presence.offline_authenticated() {
            self.advisory
                .advise("Offline: deleted on this device only; it will sync later");
        }

        let ids: Vec<&str> = victims.iter().map(|e| e.id()).collect();
        let deleted = self.collection().delete_many(&filter)?;
        if let Some(cache) = &self.cache {
            cache.remove_where(|e| ids.contains(&e.id()));
        }
        for id in ids {
            self.emit(ChangeEvent::Deleted {
                kind: T::KIND,
                id: id.to_string(),
            });
        }
        info!(kind = %T::KIND, deleted, "Bulk delete finished");
        Ok(deleted)
    }

    async fn delete_remote(&self, victims: &[T], user: &str, scope: RemoteScope) {
        match scope {
            RemoteScope::AllForUser => {
                if let Err(e) = self.remote.delete_all_for_user(user).await {
                    warn!(kind = %T::KIND, user_id = user, error = %e, "Remote bulk delete incomplete");
                    self.advisory
                        .advise("Some items could not be removed from the cloud");
                }
            }
            RemoteScope::EachRow => {
                let mut failed = 0;
                for entity in victims.iter().filter(|e| e.user_id() == Some(user)) {
                    if let Err(e) = self.remote.delete_one(entity.id(), user).await {
                        warn!(kind = %T::KIND, id = entity.id(), error = %e, "Remote delete failed");
                        failed += 1;
                    }
                }
                if failed > 0 {
                    self.advisory
                        .advise("Some items could not be removed from the cloud");
                }
            }
        }
    }
}
