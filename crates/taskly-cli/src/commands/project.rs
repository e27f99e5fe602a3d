//! Project command handlers
//!
//! Deleting a project also deletes its tasks.

use anyhow::{Context, Result};

use taskly_core::{Engine, Project};

use super::resolve_id;
use crate::output::{short_id, Output};
use crate::prompt::confirm;

/// Resolve a project id or prefix among the visible projects
pub(crate) async fn resolve_project_id(engine: &Engine, input: &str) -> Result<String> {
    let projects = engine.projects().list().await?;
    resolve_id(
        "project",
        input,
        projects.iter().map(|p| (p.id.as_str(), p.name.as_str())),
    )
}

/// Create a new project
pub async fn create(
    engine: &Engine,
    name: String,
    description: Option<String>,
    color: Option<String>,
    output: &Output,
) -> Result<()> {
    let mut project = Project::new(name);
    project.description = description;
    if color.is_some() {
        project.color = color;
    }

    let project = engine
        .projects()
        .create(project)
        .await
        .context("Failed to create project")?;

    output.success(&format!("Created project: {}", project.id));
    output.print_project(&project, 0);
    Ok(())
}

/// List projects with task counts
pub async fn list(engine: &Engine, output: &Output) -> Result<()> {
    let projects = engine.projects().list().await?;
    let counts = engine.projects().task_counts().await?;

    let rows: Vec<(Project, usize)> = projects
        .into_iter()
        .map(|p| {
            let count = counts.get(&p.id).copied().unwrap_or(0);
            (p, count)
        })
        .collect();

    output.print_projects(&rows);
    Ok(())
}

/// Show a project and its tasks
pub async fn show(engine: &Engine, id: String, output: &Output) -> Result<()> {
    let id = resolve_project_id(engine, &id).await?;
    let project = engine
        .projects()
        .get(&id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Project not found: {}", id))?;
    let tasks = engine.tasks().list_by_project(Some(project.id.as_str())).await?;

    output.print_project(&project, tasks.len());
    if !output.is_json() && !tasks.is_empty() {
        println!();
        output.print_tasks(&tasks);
    }
    Ok(())
}

/// Delete a project together with its tasks
pub async fn delete(engine: &Engine, id: String, output: &Output) -> Result<()> {
    let id = resolve_project_id(engine, &id).await?;
    let task_count = engine.projects().task_count(&id).await?;

    if output.should_prompt() {
        println!(
            "Delete project {} and its {} task(s)",
            short_id(&id),
            task_count
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    engine
        .projects()
        .delete(&id)
        .await
        .context("Failed to delete project")?;

    output.success(&format!("Deleted project: {}", id));
    Ok(())
}

/// Delete every project and all their tasks
pub async fn clear(engine: &Engine, output: &Output) -> Result<()> {
    if output.should_prompt() && !confirm("Delete all projects and their tasks?")? {
        println!("Cancelled.");
        return Ok(());
    }

    let removed = engine.projects().clear_all().await?;
    output.success(&format!("Deleted {} project(s)", removed));
    Ok(())
}
