//! Data models for Taskly
//!
//! Defines the synchronized entities (Task, Project, Notification) and the
//! ActiveSession record used for device exclusivity.
//!
//! All timestamps are UTC and truncated to millisecond precision, which is
//! the precision both the local store and the remote schema keep.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time, truncated to the precision the stores persist.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Error returned when a stored string does not name a known enum variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Enum with a stable string projection and a fixed variant order
pub trait StringEnum: FromStr<Err = ParseEnumError> + Copy + 'static {
    /// All variants, in declaration order
    fn variants() -> &'static [Self];
    fn as_str(&self) -> &'static str;
}

/// Declares an enum with a stable string projection.
///
/// The string form is what both the local and the remote schema store, so
/// variant names must never be renamed once released.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// All variants, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The string projection stored by the local and remote schema
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl StringEnum for $name {
            fn variants() -> &'static [Self] {
                Self::ALL
            }

            fn as_str(&self) -> &'static str {
                $name::as_str(self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Task priority
    TaskPriority {
        Low => "Low",
        Medium => "Medium",
        High => "High",
        Critical => "Critical",
    }
}

string_enum! {
    /// Processing stage of a task
    TaskStatus {
        New => "New",
        InProgress => "InProgress",
        Completed => "Completed",
        Postponed => "Postponed",
        Cancelled => "Cancelled",
    }
}

string_enum! {
    /// Severity of a notification
    NotificationType {
        Success => "Success",
        Info => "Info",
        Warning => "Warning",
        Error => "Error",
    }
}

string_enum! {
    /// Source of a notification
    NotificationCategory {
        System => "System",
        Project => "Project",
        Task => "Task",
        TaskReminder => "TaskReminder",
        ProjectReminder => "ProjectReminder",
    }
}

/// The three synchronized entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Task,
    Project,
    Notification,
}

impl EntityKind {
    /// Name of the local collection holding this kind
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Task => "tasks",
            EntityKind::Project => "projects",
            EntityKind::Notification => "notifications",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// Borrowed view of an entity that carries reminders
#[derive(Debug, Clone, Copy)]
pub enum ReminderTarget<'a> {
    Task(&'a Task),
    Project(&'a Project),
}

/// Fields every synchronized entity shares
///
/// `user_id == None` marks data created while signed out; it is claimed at the
/// next login. `needs_synchronization` marks an offline-authored mutation that
/// has not yet reached the remote store.
pub trait SyncEntity: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn created_at(&self) -> DateTime<Utc>;
    fn set_created_at(&mut self, at: DateTime<Utc>);
    fn user_id(&self) -> Option<&str>;
    fn set_user_id(&mut self, user_id: Option<String>);
    fn needs_synchronization(&self) -> bool;
    fn set_needs_synchronization(&mut self, value: bool);

    /// Key lists and caches are sorted by, newest first
    fn sort_key(&self) -> DateTime<Utc> {
        self.created_at()
    }

    /// Reminder-bearing view, if this kind schedules reminders
    fn reminder_target(&self) -> Option<ReminderTarget<'_>> {
        None
    }

    /// Whether the entity has an owner to sync under
    fn is_owned(&self) -> bool {
        self.user_id().is_some_and(|u| !u.is_empty())
    }
}

/// Which reminders fire ahead of a due date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSettings {
    /// One day before
    pub day: bool,
    /// Two hours before
    pub hour: bool,
    /// Thirty minutes before
    pub minute: bool,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            day: true,
            hour: true,
            minute: true,
        }
    }
}

impl ReminderSettings {
    pub fn any_enabled(&self) -> bool {
        self.day || self.hour || self.minute
    }
}

/// A task, optionally belonging to a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    pub needs_synchronization: bool,
    pub reminders: ReminderSettings,
}

impl Task {
    /// Create a new task with a fresh id
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: None,
            created_at: now_millis(),
            due_date: None,
            completed_at: None,
            priority: TaskPriority::Medium,
            status: TaskStatus::New,
            project_id: None,
            user_id: None,
            needs_synchronization: false,
            reminders: ReminderSettings::default(),
        }
    }

    /// Builder-style project assignment
    pub fn in_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Builder-style due date
    pub fn due(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due.trunc_subsecs(3));
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Mark complete or reopen, keeping `status` and `completed_at` consistent
    ///
    /// Reopening a completed task moves it back to `InProgress`.
    pub fn set_completed(&mut self, completed: bool) {
        if completed {
            self.status = TaskStatus::Completed;
            self.completed_at = Some(now_millis());
        } else if self.status == TaskStatus::Completed {
            self.status = TaskStatus::InProgress;
            self.completed_at = None;
        }
    }

    /// Due before `now` and not yet completed
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_completed() && self.due_date.is_some_and(|due| due < now)
    }
}

impl SyncEntity for Task {
    const KIND: EntityKind = EntityKind::Task;

    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = at;
    }
    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
    fn set_user_id(&mut self, user_id: Option<String>) {
        self.user_id = user_id;
    }
    fn needs_synchronization(&self) -> bool {
        self.needs_synchronization
    }
    fn set_needs_synchronization(&mut self, value: bool) {
        self.needs_synchronization = value;
    }
    fn reminder_target(&self) -> Option<ReminderTarget<'_>> {
        Some(ReminderTarget::Task(self))
    }
}

/// Default project color
pub const DEFAULT_PROJECT_COLOR: &str = "#3f51b5";

/// A project grouping tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub color: Option<String>,
    pub user_id: Option<String>,
    pub needs_synchronization: bool,
    pub reminders: ReminderSettings,
}

impl Project {
    /// Create a new project with a fresh id
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            created_at: now_millis(),
            due_date: None,
            color: Some(DEFAULT_PROJECT_COLOR.to_string()),
            user_id: None,
            needs_synchronization: false,
            reminders: ReminderSettings::default(),
        }
    }
}

impl SyncEntity for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = at;
    }
    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
    fn set_user_id(&mut self, user_id: Option<String>) {
        self.user_id = user_id;
    }
    fn needs_synchronization(&self) -> bool {
        self.needs_synchronization
    }
    fn set_needs_synchronization(&mut self, value: bool) {
        self.needs_synchronization = value;
    }
    fn reminder_target(&self) -> Option<ReminderTarget<'_>> {
        Some(ReminderTarget::Project(self))
    }
}

/// A stored notification (history entry)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub message: String,
    pub title: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub kind: NotificationType,
    pub category: NotificationCategory,
    /// Task or project the notification is about
    pub entity_id: Option<String>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    pub needs_synchronization: bool,
}

impl Notification {
    pub fn new(message: impl Into<String>, kind: NotificationType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message: message.into(),
            title: None,
            timestamp: now_millis(),
            kind,
            category: NotificationCategory::System,
            entity_id: None,
            project_id: None,
            user_id: None,
            needs_synchronization: false,
        }
    }

    pub fn with_category(mut self, category: NotificationCategory) -> Self {
        self.category = category;
        self
    }

    pub fn is_task(&self) -> bool {
        matches!(
            self.category,
            NotificationCategory::Task | NotificationCategory::TaskReminder
        )
    }

    pub fn is_project(&self) -> bool {
        matches!(
            self.category,
            NotificationCategory::Project | NotificationCategory::ProjectReminder
        )
    }
}

impl SyncEntity for Notification {
    const KIND: EntityKind = EntityKind::Notification;

    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.timestamp = at;
    }
    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
    fn set_user_id(&mut self, user_id: Option<String>) {
        self.user_id = user_id;
    }
    fn needs_synchronization(&self) -> bool {
        self.needs_synchronization
    }
    fn set_needs_synchronization(&mut self, value: bool) {
        self.needs_synchronization = value;
    }
}

/// The single device allowed to hold a session for a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub user_id: String,
    pub device_id: String,
    pub last_login_time: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_task_defaults() {
        let task = Task::new("Write report");
        assert!(!task.id.is_empty());
        assert_eq!(task.title, "Write report");
        assert_eq!(task.status, TaskStatus::New);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(task.user_id.is_none());
        assert!(!task.needs_synchronization);
        assert!(task.reminders.any_enabled());
    }

    #[test]
    fn test_timestamps_are_millisecond_precision() {
        let task = Task::new("t");
        assert_eq!(task.created_at.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_set_completed_round_trip() {
        let mut task = Task::new("t");
        task.set_completed(true);
        assert!(task.is_completed());
        assert!(task.completed_at.is_some());

        task.set_completed(false);
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.completed_at.is_none());

        // Reopening a task that was never completed leaves it alone
        let mut fresh = Task::new("t");
        fresh.set_completed(false);
        assert_eq!(fresh.status, TaskStatus::New);
    }

    #[test]
    fn test_overdue() {
        let now = Utc::now();
        let late = Task::new("late").due(now - Duration::hours(1));
        let upcoming = Task::new("upcoming").due(now + Duration::hours(1));
        let mut done = Task::new("done").due(now - Duration::hours(1));
        done.set_completed(true);

        assert!(late.is_overdue(now));
        assert!(!upcoming.is_overdue(now));
        assert!(!done.is_overdue(now));
        assert!(!Task::new("undated").is_overdue(now));
    }

    #[test]
    fn test_enum_string_codec() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), *status);
        }
        assert_eq!("Critical".parse::<TaskPriority>(), Ok(TaskPriority::Critical));

        let err = "Urgent".parse::<TaskPriority>().unwrap_err();
        assert_eq!(err.kind, "TaskPriority");
        assert!(err.to_string().contains("Urgent"));
    }

    #[test]
    fn test_notification_categories() {
        let n = Notification::new("due soon", NotificationType::Warning)
            .with_category(NotificationCategory::TaskReminder);
        assert!(n.is_task());
        assert!(!n.is_project());
        assert_eq!(n.created_at(), n.timestamp);
    }

    #[test]
    fn test_is_owned() {
        let mut project = Project::new("Home");
        assert!(!project.is_owned());
        project.user_id = Some(String::new());
        assert!(!project.is_owned());
        project.user_id = Some("u1".into());
        assert!(project.is_owned());
        assert_eq!(project.color.as_deref(), Some(DEFAULT_PROJECT_COLOR));
    }
}
