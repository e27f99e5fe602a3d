//! Reminder scheduling contract
//!
//! Coordinators call the scheduler after every successful write. Scheduling
//! is best-effort: an error is logged by the caller and never fails the write.

use async_trait::async_trait;

use crate::models::{Project, Task};

#[async_trait]
pub trait ReminderScheduler: Send + Sync {
    /// (Re)schedule reminders for a task's due date
    async fn schedule_for_task(&self, task: &Task) -> anyhow::Result<()>;

    async fn schedule_for_project(&self, project: &Project) -> anyhow::Result<()>;

    async fn cancel_for_task(&self, task_id: &str) -> anyhow::Result<()>;

    async fn cancel_for_project(&self, project_id: &str) -> anyhow::Result<()>;
}

/// Scheduler for environments without reminders
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

#[async_trait]
impl ReminderScheduler for NoopScheduler {
    async fn schedule_for_task(&self, _task: &Task) -> anyhow::Result<()> {
        Ok(())
    }

    async fn schedule_for_project(&self, _project: &Project) -> anyhow::Result<()> {
        Ok(())
    }

    async fn cancel_for_task(&self, _task_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn cancel_for_project(&self, _project_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
