//! Task-specific coordinator operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::coordinator::{
    CascadeDelete, ListFilter, RemoteScope, SyncCoordinator, SyncError, SyncResult,
};
use crate::models::{StringEnum, Task, TaskStatus};
use crate::remote::FieldFilter;
use crate::storage::records::to_millis;
use crate::storage::Filter;

pub type TaskCoordinator = SyncCoordinator<Task>;

fn project_filter(project_id: &str) -> ListFilter<Task> {
    let wanted = project_id.to_string();
    ListFilter {
        local: Filter::eq("project_id", project_id.to_string()),
        remote: Some(FieldFilter::eq("ProjectId", project_id)),
        matches: Box::new(move |task: &Task| task.project_id.as_deref() == Some(wanted.as_str())),
    }
}

/// Parse a status filter; `None`, empty or "all" mean every status
pub fn parse_status_filter(status: Option<&str>) -> SyncResult<Option<TaskStatus>> {
    match status.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("all") => Ok(None),
        Some(s) => s
            .parse::<TaskStatus>()
            .map(Some)
            .map_err(|e| SyncError::InvalidArgument(e.to_string())),
    }
}

impl SyncCoordinator<Task> {
    /// Tasks of one project, or all tasks
    pub async fn list_by_project(&self, project_id: Option<&str>) -> SyncResult<Vec<Task>> {
        match project_id {
            Some(id) => self.list_where(Some(project_filter(id))).await,
            None => self.list().await,
        }
    }

    /// Delete the tasks of a project visible to the current user
    pub async fn delete_by_project(&self, project_id: &str) -> SyncResult<usize> {
        if project_id.trim().is_empty() {
            return Err(SyncError::InvalidArgument("project id is empty".into()));
        }
        let presence = self.presence().await;
        let filter = Filter::visible_to(presence.user_id.as_deref())
            .and(Filter::eq("project_id", project_id.to_string()));
        self.delete_where(filter, RemoteScope::EachRow).await
    }

    /// Delete every visible task, optionally only those in one status
    ///
    /// Unfiltered clears use the batched remote delete.
    pub async fn clear_all(&self, status: Option<&str>) -> SyncResult<usize> {
        let status = parse_status_filter(status)?;
        let presence = self.presence().await;
        let mut filter = Filter::visible_to(presence.user_id.as_deref());

        let scope = match status {
            Some(status) => {
                filter = filter.and(Filter::eq("status", status.as_str().to_string()));
                RemoteScope::EachRow
            }
            None => RemoteScope::AllForUser,
        };
        self.delete_where(filter, scope).await
    }

    /// Visible tasks in `status`
    pub async fn by_status(&self, status: TaskStatus) -> SyncResult<Vec<Task>> {
        if let Some(snapshot) = self.cache.as_ref().and_then(|c| c.snapshot()) {
            return Ok(snapshot.into_iter().filter(|t| t.status == status).collect());
        }
        let presence = self.presence().await;
        let filter = Filter::visible_to(presence.user_id.as_deref())
            .and(Filter::eq("status", status.as_str().to_string()));
        Ok(self.collection().find(&filter)?)
    }

    /// Visible tasks due before `now` and not completed, soonest due first
    pub async fn overdue(&self, now: DateTime<Utc>) -> SyncResult<Vec<Task>> {
        let mut tasks = match self.cache.as_ref().and_then(|c| c.snapshot()) {
            Some(snapshot) => snapshot,
            None => {
                let presence = self.presence().await;
                let filter = Filter::visible_to(presence.user_id.as_deref())
                    .and(Filter::Lt("due_date", to_millis(now).into()));
                self.collection().find(&filter)?
            }
        };

        tasks.retain(|t| t.is_overdue(now));
        tasks.sort_by_key(|t| t.due_date);
        Ok(tasks)
    }

    /// Complete a task and cancel its reminders
    pub async fn mark_completed(&self, id: &str) -> SyncResult<Task> {
        let Some(mut task) = self.get_local(id)? else {
            return Err(SyncError::NotFound {
                collection: "tasks",
                id: id.to_string(),
            });
        };

        task.set_completed(true);
        let task = self.update(task).await?;
        self.cancel_reminders(id).await;
        debug!(id, "Task completed");
        Ok(task)
    }

    /// Number of visible tasks per status, in declaration order
    pub async fn status_counts(&self) -> SyncResult<Vec<(TaskStatus, usize)>> {
        let tasks = self.list().await?;
        Ok(TaskStatus::variants()
            .iter()
            .map(|status| (*status, tasks.iter().filter(|t| t.status == *status).count()))
            .collect())
    }
}

/// Cascade for project deletes: every local task of the project goes,
/// whoever owns it, so no orphan remains.
#[async_trait]
impl CascadeDelete for SyncCoordinator<Task> {
    async fn delete_children(&self, parent_id: &str) -> SyncResult<usize> {
        let filter = Filter::eq("project_id", parent_id.to_string());
        let removed = self.delete_where(filter, RemoteScope::EachRow).await?;
        if removed > 0 {
            debug!(project_id = parent_id, removed, "Cascaded project delete to tasks");
        }
        Ok(removed)
    }
}
