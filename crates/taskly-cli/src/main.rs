//! Taskly CLI
//!
//! Command-line interface for Taskly - offline-first tasks and projects.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use taskly_core::{Config, Engine};

mod advisory;
mod commands;
mod output;
mod prompt;

use advisory::StderrAdvisory;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "taskly")]
#[command(about = "Taskly - Offline-first tasks and projects")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Show or clear notification history
    Notifications {
        #[command(subcommand)]
        command: Option<NotificationCommands>,
    },
    /// Sign in and make this device the active one
    Login {
        /// Account user id
        user_id: String,
        /// Identity token issued by the auth provider
        #[arg(short, long, env = "TASKLY_ID_TOKEN")]
        token: String,
        /// Refresh token, if the provider issued one
        #[arg(long)]
        refresh_token: Option<String>,
    },
    /// Sign out on this device
    Logout,
    /// Push pending changes and pull remote data
    Sync,
    /// Show device, session and sync status
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Create a new task
    #[command(alias = "add")]
    Create {
        /// Task title
        title: String,
        /// Project ID (full id or prefix)
        #[arg(short, long)]
        project: Option<String>,
        /// Due date (YYYY-MM-DD)
        #[arg(short, long)]
        due: Option<String>,
        /// Low, Medium, High or Critical
        #[arg(long)]
        priority: Option<String>,
        /// Longer description
        #[arg(long)]
        description: Option<String>,
    },
    /// List tasks
    #[command(alias = "ls")]
    List {
        /// Only tasks of this project
        #[arg(short, long)]
        project: Option<String>,
        /// Only tasks in this status ("all" for every status)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Show task details
    Show {
        /// Task ID (full id or prefix)
        id: String,
    },
    /// Change a task
    Edit {
        /// Task ID (full id or prefix)
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        /// Due date (YYYY-MM-DD), or "none" to clear it
        #[arg(long)]
        due: Option<String>,
    },
    /// Mark a task completed
    Done {
        /// Task ID (full id or prefix)
        id: String,
    },
    /// Tasks past their due date
    Overdue,
    /// Delete a task
    #[command(alias = "rm")]
    Delete {
        /// Task ID (full id or prefix)
        id: String,
    },
    /// Delete all tasks, optionally only those in one status
    Clear {
        #[arg(short, long)]
        status: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a new project
    #[command(alias = "add")]
    Create {
        /// Project name
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Display color, e.g. "#3f51b5"
        #[arg(long)]
        color: Option<String>,
    },
    /// List projects with their task counts
    #[command(alias = "ls")]
    List,
    /// Show a project and its tasks
    Show {
        /// Project ID (full id or prefix)
        id: String,
    },
    /// Delete a project and its tasks
    #[command(alias = "rm")]
    Delete {
        /// Project ID (full id or prefix)
        id: String,
    },
    /// Delete all projects and their tasks
    Clear,
}

#[derive(Subcommand, Clone)]
enum NotificationCommands {
    /// List notifications, newest first
    #[command(alias = "ls")]
    List,
    /// Delete all notifications
    Clear,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (remote_url, auto_sync, device_id, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

/// Log to stderr, filtered by TASKLY_LOG (default: warn)
fn init_logging() {
    let env_filter =
        EnvFilter::try_from_env("TASKLY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the engine
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), &output);
    }

    let config = Config::load().context("Failed to load configuration")?;
    let auto_sync = config.auto_sync;
    let engine = Engine::builder(config)
        .advisory(Arc::new(StderrAdvisory::new(output.is_quiet())))
        .build()?;

    let online = engine.connectivity().check_now().await;
    debug!(online, "Connectivity checked");

    // A one-shot process never sees a reconnect event, so flush pending rows up front
    let is_manual_sync = matches!(cli.command, Commands::Sync);
    if online && auto_sync && !is_manual_sync {
        engine.sync_on_reconnect().await;
    }

    let result = match cli.command {
        Commands::Task { command } => handle_task_command(command, &engine, &output).await,
        Commands::Project { command } => handle_project_command(command, &engine, &output).await,
        Commands::Notifications { command } => {
            handle_notification_command(command, &engine, &output).await
        }
        Commands::Login {
            user_id,
            token,
            refresh_token,
        } => commands::session::login(&engine, user_id, token, refresh_token, &output).await,
        Commands::Logout => commands::session::logout(&engine, &output).await,
        Commands::Sync => commands::sync::sync(&engine, &output).await,
        Commands::Status => commands::status::show(&engine, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    engine.shutdown();
    result
}

async fn handle_task_command(command: TaskCommands, engine: &Engine, output: &Output) -> Result<()> {
    use commands::task;

    match command {
        TaskCommands::Create {
            title,
            project,
            due,
            priority,
            description,
        } => {
            let fields = task::NewTask {
                title,
                project,
                due,
                priority,
                description,
            };
            task::create(engine, fields, output).await
        }
        TaskCommands::List { project, status } => task::list(engine, project, status, output).await,
        TaskCommands::Show { id } => task::show(engine, id, output).await,
        TaskCommands::Edit {
            id,
            title,
            status,
            priority,
            due,
        } => {
            let changes = task::TaskChanges {
                title,
                status,
                priority,
                due,
            };
            task::edit(engine, id, changes, output).await
        }
        TaskCommands::Done { id } => task::done(engine, id, output).await,
        TaskCommands::Overdue => task::overdue(engine, output).await,
        TaskCommands::Delete { id } => task::delete(engine, id, output).await,
        TaskCommands::Clear { status } => task::clear(engine, status, output).await,
    }
}

async fn handle_project_command(
    command: ProjectCommands,
    engine: &Engine,
    output: &Output,
) -> Result<()> {
    use commands::project;

    match command {
        ProjectCommands::Create {
            name,
            description,
            color,
        } => project::create(engine, name, description, color, output).await,
        ProjectCommands::List => project::list(engine, output).await,
        ProjectCommands::Show { id } => project::show(engine, id, output).await,
        ProjectCommands::Delete { id } => project::delete(engine, id, output).await,
        ProjectCommands::Clear => project::clear(engine, output).await,
    }
}

async fn handle_notification_command(
    command: Option<NotificationCommands>,
    engine: &Engine,
    output: &Output,
) -> Result<()> {
    match command {
        Some(NotificationCommands::List) | None => commands::notification::list(engine, output).await,
        Some(NotificationCommands::Clear) => commands::notification::clear(engine, output).await,
    }
}

fn handle_config_command(command: Option<ConfigCommands>, output: &Output) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(output),
        Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_task_create() {
        let cli = Cli::try_parse_from([
            "taskly", "task", "add", "Buy milk", "--due", "2026-01-31", "-p", "abc",
        ])
        .unwrap();
        match cli.command {
            Commands::Task {
                command: TaskCommands::Create {
                    title, due, project, ..
                },
            } => {
                assert_eq!(title, "Buy milk");
                assert_eq!(due.as_deref(), Some("2026-01-31"));
                assert_eq!(project.as_deref(), Some("abc"));
            }
            _ => panic!("expected task create"),
        }
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from(["taskly", "status", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Status));
    }
}
