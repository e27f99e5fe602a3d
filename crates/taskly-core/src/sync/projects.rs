//! Project-specific coordinator operations
//!
//! Deleting a project cascades to its tasks first; the cascade is wired with
//! [`SyncCoordinator::with_cascade`] using the task coordinator.

use std::collections::HashMap;

use super::coordinator::{RemoteScope, SyncCoordinator, SyncResult};
use crate::models::{Project, Task};
use crate::storage::Filter;

pub type ProjectCoordinator = SyncCoordinator<Project>;

impl SyncCoordinator<Project> {
    /// Delete every visible project together with its tasks
    pub async fn clear_all(&self) -> SyncResult<usize> {
        let presence = self.presence().await;
        let filter = Filter::visible_to(presence.user_id.as_deref());
        self.delete_where(filter, RemoteScope::AllForUser).await
    }

    /// Number of visible tasks in a project
    pub async fn task_count(&self, project_id: &str) -> SyncResult<usize> {
        let presence = self.presence().await;
        let filter = Filter::visible_to(presence.user_id.as_deref())
            .and(Filter::eq("project_id", project_id.to_string()));
        Ok(self.local.collection::<Task>().count(&filter)?)
    }

    /// Visible task counts keyed by project id; projects without tasks are absent
    pub async fn task_counts(&self) -> SyncResult<HashMap<String, usize>> {
        let presence = self.presence().await;
        let tasks = self
            .local
            .collection::<Task>()
            .find(&Filter::visible_to(presence.user_id.as_deref()))?;

        let mut counts = HashMap::new();
        for project_id in tasks.into_iter().filter_map(|t| t.project_id) {
            *counts.entry(project_id).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
