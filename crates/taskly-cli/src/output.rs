//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use taskly_core::{Notification, Project, Task};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Pretty-print any serializable value
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to serialize output: {}", e),
        }
    }

    /// Print a single task
    pub fn print_task(&self, task: &Task) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:          {}", task.id);
                println!("Title:       {}", task.title);
                if let Some(ref desc) = task.description {
                    println!("Description: {}", desc);
                }
                println!("Status:      {}", task.status);
                println!("Priority:    {}", task.priority);
                if let Some(ref project_id) = task.project_id {
                    println!("Project:     {}", project_id);
                }
                if let Some(due) = task.due_date {
                    println!("Due:         {}", due.format("%Y-%m-%d"));
                }
                if let Some(done) = task.completed_at {
                    println!("Completed:   {}", done.format("%Y-%m-%d %H:%M"));
                }
                println!("Created:     {}", task.created_at.format("%Y-%m-%d %H:%M"));
                println!("Sync:        {}", sync_label(task.user_id.as_deref(), task.needs_synchronization));
            }
            OutputFormat::Json => self.json(task),
            OutputFormat::Quiet => println!("{}", task.id),
        }
    }

    /// Print a list of tasks
    pub fn print_tasks(&self, tasks: &[Task]) {
        match self.format {
            OutputFormat::Human => {
                if tasks.is_empty() {
                    println!("No tasks found.");
                    return;
                }
                for task in tasks {
                    let due = task
                        .due_date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_default();
                    let pending = if task.needs_synchronization { " *" } else { "" };
                    println!(
                        "{} | {:<10} | {:<8} | {:<10} | {}{}",
                        short_id(&task.id),
                        task.status,
                        task.priority,
                        due,
                        truncate(&task.title, 40),
                        pending
                    );
                }
                println!("\n{} task(s)", tasks.len());
            }
            OutputFormat::Json => self.json(tasks),
            OutputFormat::Quiet => {
                for task in tasks {
                    println!("{}", task.id);
                }
            }
        }
    }

    /// Print a single project with its task count
    pub fn print_project(&self, project: &Project, task_count: usize) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:          {}", project.id);
                println!("Name:        {}", project.name);
                if let Some(ref desc) = project.description {
                    println!("Description: {}", desc);
                }
                if let Some(ref color) = project.color {
                    println!("Color:       {}", color);
                }
                if let Some(due) = project.due_date {
                    println!("Due:         {}", due.format("%Y-%m-%d"));
                }
                println!("Tasks:       {}", task_count);
                println!("Created:     {}", project.created_at.format("%Y-%m-%d %H:%M"));
                println!(
                    "Sync:        {}",
                    sync_label(project.user_id.as_deref(), project.needs_synchronization)
                );
            }
            OutputFormat::Json => self.json(&serde_json::json!({
                "project": project,
                "task_count": task_count
            })),
            OutputFormat::Quiet => println!("{}", project.id),
        }
    }

    /// Print a list of projects with their task counts
    pub fn print_projects(&self, projects: &[(Project, usize)]) {
        match self.format {
            OutputFormat::Human => {
                if projects.is_empty() {
                    println!("No projects found.");
                    return;
                }
                for (project, count) in projects {
                    println!(
                        "{} | {} [{}]",
                        short_id(&project.id),
                        truncate(&project.name, 40),
                        count
                    );
                }
                println!("\n{} project(s)", projects.len());
            }
            OutputFormat::Json => {
                let items: Vec<_> = projects
                    .iter()
                    .map(|(project, count)| serde_json::json!({"project": project, "task_count": count}))
                    .collect();
                self.json(&items);
            }
            OutputFormat::Quiet => {
                for (project, _) in projects {
                    println!("{}", project.id);
                }
            }
        }
    }

    /// Print notification history
    pub fn print_notifications(&self, notifications: &[Notification]) {
        match self.format {
            OutputFormat::Human => {
                if notifications.is_empty() {
                    println!("No notifications.");
                    return;
                }
                for n in notifications {
                    println!(
                        "[{}] {:<7} {}",
                        n.timestamp.format("%Y-%m-%d %H:%M"),
                        n.kind,
                        truncate_line(&n.message, 60)
                    );
                }
            }
            OutputFormat::Json => self.json(notifications),
            OutputFormat::Quiet => {
                for n in notifications {
                    println!("{}", n.id);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn sync_label(user_id: Option<&str>, pending: bool) -> String {
    match (user_id, pending) {
        (None, _) => "local only".to_string(),
        (Some(user), true) => format!("{} (pending)", user),
        (Some(user), false) => format!("{} (synced)", user),
    }
}

/// First 8 characters of an id
pub fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ääääääääääää", 5), "ää...");
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("single line", 20), "single line");
        assert_eq!(truncate_line("line one\nline two", 20), "line one");
    }

    #[test]
    fn test_sync_label() {
        assert_eq!(sync_label(None, true), "local only");
        assert_eq!(sync_label(Some("u1"), true), "u1 (pending)");
        assert_eq!(sync_label(Some("u1"), false), "u1 (synced)");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
