//! Task command handlers

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use taskly_core::sync::parse_status_filter;
use taskly_core::{Engine, Task, TaskPriority, TaskStatus};

use super::{project::resolve_project_id, resolve_id};
use crate::output::{short_id, Output};
use crate::prompt::confirm;

pub struct NewTask {
    pub title: String,
    pub project: Option<String>,
    pub due: Option<String>,
    pub priority: Option<String>,
    pub description: Option<String>,
}

#[derive(Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due: Option<String>,
}

/// Parse a YYYY-MM-DD date as the end of that day (UTC)
pub(crate) fn parse_due(input: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", input))?;
    let end_of_day = date
        .and_hms_opt(23, 59, 59)
        .with_context(|| format!("Invalid date '{}'", input))?;
    Ok(end_of_day.and_utc())
}

/// Apply edits to a task; status changes keep `completed_at` consistent
pub(crate) fn apply_changes(task: &mut Task, changes: TaskChanges) -> Result<()> {
    if let Some(title) = changes.title {
        task.title = title;
    }
    if let Some(priority) = changes.priority {
        task.priority = priority.parse::<TaskPriority>()?;
    }
    if let Some(status) = changes.status {
        match status.parse::<TaskStatus>()? {
            TaskStatus::Completed => task.set_completed(true),
            other => {
                task.status = other;
                task.completed_at = None;
            }
        }
    }
    if let Some(due) = changes.due {
        task.due_date = if due.is_empty() || due == "none" {
            None
        } else {
            Some(parse_due(&due)?)
        };
    }
    Ok(())
}

/// Find a visible task by full id or prefix
async fn resolve_task(engine: &Engine, input: &str) -> Result<Task> {
    let tasks = engine.tasks().list().await?;
    let id = resolve_id(
        "task",
        input,
        tasks.iter().map(|t| (t.id.as_str(), t.title.as_str())),
    )?;
    tasks
        .into_iter()
        .find(|t| t.id == id)
        .ok_or_else(|| anyhow::anyhow!("Task not found: {}", input))
}

/// Create a new task
pub async fn create(engine: &Engine, fields: NewTask, output: &Output) -> Result<()> {
    let mut task = Task::new(fields.title);
    task.description = fields.description;
    if let Some(project) = fields.project {
        task.project_id = Some(resolve_project_id(engine, &project).await?);
    }
    if let Some(due) = fields.due {
        task = task.due(parse_due(&due)?);
    }
    if let Some(priority) = fields.priority {
        task.priority = priority.parse::<TaskPriority>()?;
    }

    let task = engine
        .tasks()
        .create(task)
        .await
        .context("Failed to create task")?;

    output.success(&format!("Created task: {}", task.id));
    output.print_task(&task);
    Ok(())
}

/// List tasks, optionally filtered by project and status
pub async fn list(
    engine: &Engine,
    project: Option<String>,
    status: Option<String>,
    output: &Output,
) -> Result<()> {
    let status = parse_status_filter(status.as_deref())?;
    let project_id = match project {
        Some(ref p) => Some(resolve_project_id(engine, p).await?),
        None => None,
    };

    let mut tasks = engine.tasks().list_by_project(project_id.as_deref()).await?;
    if let Some(status) = status {
        tasks.retain(|t| t.status == status);
    }

    output.print_tasks(&tasks);
    Ok(())
}

/// Show a single task, refreshed from the remote when online
pub async fn show(engine: &Engine, id: String, output: &Output) -> Result<()> {
    let task = resolve_task(engine, &id).await?;
    let task = engine.tasks().get(&task.id).await?.unwrap_or(task);
    output.print_task(&task);
    Ok(())
}

/// Edit a task
pub async fn edit(engine: &Engine, id: String, changes: TaskChanges, output: &Output) -> Result<()> {
    let mut task = resolve_task(engine, &id).await?;
    apply_changes(&mut task, changes)?;

    let task = engine
        .tasks()
        .update(task)
        .await
        .context("Failed to update task")?;

    output.success("Task updated");
    output.print_task(&task);
    Ok(())
}

/// Mark a task completed
pub async fn done(engine: &Engine, id: String, output: &Output) -> Result<()> {
    let task = resolve_task(engine, &id).await?;
    let task = engine.tasks().mark_completed(&task.id).await?;
    output.success(&format!("Completed: {}", task.title));
    Ok(())
}

/// List overdue tasks, soonest due first
pub async fn overdue(engine: &Engine, output: &Output) -> Result<()> {
    let tasks = engine.tasks().overdue(Utc::now()).await?;
    output.print_tasks(&tasks);
    Ok(())
}

/// Delete a task
pub async fn delete(engine: &Engine, id: String, output: &Output) -> Result<()> {
    let task = resolve_task(engine, &id).await?;

    if output.should_prompt() {
        println!("Delete task: {} - {}", short_id(&task.id), task.title);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    engine
        .tasks()
        .delete(&task.id)
        .await
        .context("Failed to delete task")?;

    output.success(&format!("Deleted task: {}", task.id));
    Ok(())
}

/// Delete all visible tasks, optionally only one status
pub async fn clear(engine: &Engine, status: Option<String>, output: &Output) -> Result<()> {
    // Validate before asking
    parse_status_filter(status.as_deref())?;

    if output.should_prompt() {
        let scope = status.as_deref().unwrap_or("all");
        if !confirm(&format!("Delete {} tasks?", scope))? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let removed = engine.tasks().clear_all(status.as_deref()).await?;
    output.success(&format!("Deleted {} task(s)", removed));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_due() {
        let due = parse_due("2026-03-14").unwrap();
        assert_eq!((due.year(), due.month(), due.day()), (2026, 3, 14));
        assert_eq!(due.hour(), 23);

        assert!(parse_due("14/03/2026").is_err());
        assert!(parse_due("2026-02-30").is_err());
    }

    #[test]
    fn test_apply_changes() {
        let mut task = Task::new("Draft");
        apply_changes(
            &mut task,
            TaskChanges {
                title: Some("Final".into()),
                status: Some("Completed".into()),
                priority: Some("High".into()),
                due: Some("2026-01-01".into()),
            },
        )
        .unwrap();
        assert_eq!(task.title, "Final");
        assert!(task.is_completed());
        assert!(task.completed_at.is_some());
        assert_eq!(task.priority, TaskPriority::High);
        assert!(task.due_date.is_some());

        apply_changes(
            &mut task,
            TaskChanges {
                status: Some("Postponed".into()),
                due: Some("none".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(task.status, TaskStatus::Postponed);
        assert!(task.completed_at.is_none());
        assert!(task.due_date.is_none());

        let bad = TaskChanges {
            priority: Some("Urgent".into()),
            ..Default::default()
        };
        assert!(apply_changes(&mut task, bad).is_err());
    }
}
