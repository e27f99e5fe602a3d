//! Notification-specific coordinator operations

use tracing::debug;

use super::coordinator::{RemoteScope, SyncCoordinator, SyncResult};
use crate::models::Notification;
use crate::storage::Filter;

pub type NotificationCoordinator = SyncCoordinator<Notification>;

impl SyncCoordinator<Notification> {
    /// Record a notification, optionally surfacing it right away
    ///
    /// Stored like any created entity; afterwards the oldest local
    /// notifications beyond the retention limit are pruned.
    pub async fn add(&self, notification: Notification, show_toast: bool) -> SyncResult<Notification> {
        let notification = self.create(notification).await?;
        if show_toast {
            self.advisory.advise(&notification.message);
        }
        self.prune().await?;
        Ok(notification)
    }

    /// Drop local notifications beyond the retention limit, oldest first
    ///
    /// Remote copies are kept.
    pub async fn prune(&self) -> SyncResult<usize> {
        let Some(limit) = self.retention else {
            return Ok(0);
        };

        let presence = self.presence().await;
        let visible = self
            .collection()
            .find(&Filter::visible_to(presence.user_id.as_deref()))?;
        if visible.len() <= limit {
            return Ok(0);
        }

        let mut pruned = 0;
        for old in visible.iter().skip(limit) {
            if self.collection().delete(&old.id)? {
                pruned += 1;
            }
            if let Some(cache) = &self.cache {
                cache.remove(&old.id);
            }
        }
        debug!(pruned, limit, "Pruned old notifications");
        Ok(pruned)
    }

    /// Delete every visible notification, locally and remotely
    pub async fn clear(&self) -> SyncResult<usize> {
        let presence = self.presence().await;
        let filter = Filter::visible_to(presence.user_id.as_deref());
        self.delete_where(filter, RemoteScope::AllForUser).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::CollectedAdvisories;
    use crate::models::{NotificationCategory, NotificationType};
    use crate::remote::RemoteEntity;
    use crate::sync::coordinator::tests::{harness, FakeAuth};
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_add_with_toast_and_retention() {
        let advisories = Arc::new(CollectedAdvisories::new());
        let mut h = harness::<Notification>(FakeAuth::signed_in("u1"), true);
        h.coordinator = h
            .coordinator
            .with_advisory(advisories.clone())
            .with_retention(2);

        let base = crate::models::now_millis();
        for (i, message) in ["first", "second", "third"].into_iter().enumerate() {
            let mut n = Notification::new(message, NotificationType::Info)
                .with_category(NotificationCategory::Task);
            n.timestamp = base + Duration::seconds(i as i64);
            h.coordinator.add(n, i == 2).await.unwrap();
        }

        assert_eq!(advisories.drain(), vec!["third"]);

        let kept: Vec<String> = h
            .coordinator
            .collection()
            .find_all()
            .unwrap()
            .into_iter()
            .map(|n| n.message)
            .collect();
        assert_eq!(kept, vec!["third", "second"]);

        // Pruning is local only
        assert_eq!(h.remote.count(&Notification::collection_for("u1")), 3);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let h = harness::<Notification>(FakeAuth::signed_out(), false);
        let base = crate::models::now_millis();
        for (i, message) in ["old", "new"].into_iter().enumerate() {
            let mut n = Notification::new(message, NotificationType::Success);
            n.timestamp = base + Duration::seconds(i as i64);
            h.coordinator.add(n, false).await.unwrap();
        }

        let listed = h.coordinator.list().await.unwrap();
        assert_eq!(listed[0].message, "new");
        assert_eq!(listed[1].message, "old");
    }

    #[tokio::test]
    async fn test_clear() {
        let h = harness::<Notification>(FakeAuth::signed_in("u1"), true);
        h.coordinator
            .add(Notification::new("a", NotificationType::Warning), false)
            .await
            .unwrap();
        h.coordinator
            .add(Notification::new("b", NotificationType::Error), false)
            .await
            .unwrap();

        assert_eq!(h.coordinator.clear().await.unwrap(), 2);
        assert!(h.coordinator.list().await.unwrap().is_empty());
        assert_eq!(h.remote.count(&Notification::collection_for("u1")), 0);
        assert_eq!(h.remote.committed_batches(), vec![2]);
    }
}
